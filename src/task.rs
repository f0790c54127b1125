use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};
use crate::process::{ProcessConfig, spawn_and_stream};

pub const LINT_TASK: &str = "lint";

/// Built-in task name to command mapping.
pub const DEFAULT_TASKS: &[(&str, &str)] = &[
    ("lint", "npm run lint"),
    ("test", "npm test"),
    ("build", "npm run build"),
];

/// What to run: an optional task name and the shell command it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: Option<String>,
    pub command: String,
}

impl TaskSpec {
    /// `cmd` wins over the task table; the task name is still kept so the
    /// lint class is recognised. Config `tasks` shadow the built-ins.
    pub fn resolve(
        task: Option<&str>,
        cmd: Option<&str>,
        tasks: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let name = task.map(str::to_string);
        if let Some(cmd) = cmd.filter(|c| !c.trim().is_empty()) {
            return Ok(Self {
                name,
                command: cmd.to_string(),
            });
        }
        let Some(task) = task else {
            return Err(Error::Config(
                "missing --task <lint|test|build> or --cmd \"<command>\"".to_string(),
            ));
        };
        let command = tasks
            .get(task)
            .cloned()
            .or_else(|| {
                DEFAULT_TASKS
                    .iter()
                    .find(|(n, _)| *n == task)
                    .map(|(_, c)| c.to_string())
            })
            .ok_or_else(|| Error::Config(format!("unknown task: {task}")))?;
        Ok(Self { name, command })
    }

    pub fn is_lint(&self) -> bool {
        self.name.as_deref() == Some(LINT_TASK)
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.command)
    }
}

/// Captured result of one task run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout then stderr; the sole input to error location.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

pub trait TaskRunner {
    fn run(&self) -> impl Future<Output = Result<TaskResult>> + Send;
}

/// Runs the task command through the platform shell in the repo root.
pub struct ShellTaskRunner {
    spec: TaskSpec,
    root: PathBuf,
    timeout: Option<Duration>,
}

impl ShellTaskRunner {
    pub fn new(spec: TaskSpec, root: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            root: root.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }
}

impl TaskRunner for ShellTaskRunner {
    async fn run(&self) -> Result<TaskResult> {
        info!(task = self.spec.label(), command = %self.spec.command, "running task");
        let mut config = ProcessConfig::shell(&self.spec.command, self.root.clone(), "task");
        config.timeout = self.timeout;
        let output = spawn_and_stream(config).await?;
        if output.signal == Some(libc::SIGINT) {
            return Err(Error::Interrupted);
        }
        info!(exit_code = output.exit_code, "task finished");
        Ok(TaskResult {
            stdout: output.stdout(),
            stderr: output.stderr(),
            exit_code: output.exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_builtin() {
        let spec = TaskSpec::resolve(Some("lint"), None, &BTreeMap::new()).unwrap();
        assert_eq!(spec.command, "npm run lint");
        assert!(spec.is_lint());
    }

    #[test]
    fn test_config_table_shadows_builtin() {
        let tasks = BTreeMap::from([("test".to_string(), "cargo test".to_string())]);
        let spec = TaskSpec::resolve(Some("test"), None, &tasks).unwrap();
        assert_eq!(spec.command, "cargo test");
        assert!(!spec.is_lint());
    }

    #[test]
    fn test_cmd_override_keeps_task_class() {
        let spec = TaskSpec::resolve(Some("lint"), Some("eslint ."), &BTreeMap::new()).unwrap();
        assert_eq!(spec.command, "eslint .");
        assert!(spec.is_lint());

        let bare = TaskSpec::resolve(None, Some("make"), &BTreeMap::new()).unwrap();
        assert_eq!(bare.label(), "make");
    }

    #[test]
    fn test_missing_and_unknown_task_are_config_errors() {
        let err = TaskSpec::resolve(None, None, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = TaskSpec::resolve(Some("deploy"), None, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("unknown task: deploy"));
    }

    #[test]
    fn test_combined_output() {
        let r = TaskResult {
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code: 1,
        };
        assert_eq!(r.combined(), "out\nerr");
        assert!(!r.success());
        let only_err = TaskResult {
            stderr: "err".into(),
            ..Default::default()
        };
        assert_eq!(only_err.combined(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_captures_both_streams() {
        let dir = tempfile::TempDir::new().unwrap();
        let spec = TaskSpec {
            name: None,
            command: "echo src/a.ts:1:1 bad; echo oops >&2; exit 2".to_string(),
        };
        let result = ShellTaskRunner::new(spec, dir.path()).run().await.unwrap();
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.stdout, "src/a.ts:1:1 bad");
        assert_eq!(result.stderr, "oops");
    }
}
