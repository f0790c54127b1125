use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::assistant::{
    DEFAULT_MODEL, DEFAULT_NUM_CTX, DEFAULT_NUM_PREDICT, DEFAULT_TEMPERATURE, DEFAULT_URL,
};
use crate::backup::DEFAULT_BACKUP_AREA;
use crate::cli::{Cli, CliCommand, RunArgs};
use crate::error::{Error, Result};
use crate::request::{DEFAULT_CONTEXT_BYTES, DEFAULT_ERROR_CHARS};
use crate::safety::{self, DEFAULT_MAX_LINES};
use crate::task::TaskSpec;

pub const DEFAULT_MAX_ERRORS: usize = 10;
pub const DEFAULT_ATTEMPTS: u32 = 2;
pub const DEFAULT_LINT_ATTEMPTS: u32 = 6;
pub const DEFAULT_FIX_ROUNDS: u32 = 2;
pub const DEFAULT_MAX_FILES: usize = 1;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub max_errors: Option<usize>,
    pub attempts: Option<u32>,
    pub fix_rounds: Option<u32>,
    pub max_lines: Option<usize>,
    pub max_files: Option<usize>,
    pub error_chars: Option<usize>,
    pub context_bytes: Option<usize>,
    pub auto_fix: Option<bool>,
    pub fix_warnings: Option<bool>,
    pub dump_prompt: Option<bool>,
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub tasks: BTreeMap<String, String>,
    #[serde(default)]
    pub assistant: AssistantFile,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AssistantFile {
    pub kind: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub num_ctx: Option<u32>,
    pub num_predict: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
    pub binary: Option<String>,
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantKind {
    Http,
    Command,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantConfig {
    pub kind: AssistantKind,
    pub url: String,
    pub model: String,
    pub num_ctx: u32,
    pub num_predict: u32,
    pub temperature: f32,
    pub timeout: Option<Duration>,
    pub binary: Option<String>,
    pub args: Vec<String>,
}

/// Assistant defaults taken from the environment (`OLLAMA_URL`, `OLLAMA_MODEL`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvDefaults {
    pub url: Option<String>,
    pub model: Option<String>,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("OLLAMA_URL").ok().filter(|v| !v.is_empty()),
            model: std::env::var("OLLAMA_MODEL").ok().filter(|v| !v.is_empty()),
        }
    }
}

/// Fully resolved settings. Passed explicitly into every component.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub repo_root: PathBuf,
    pub task: Option<TaskSpec>,
    pub max_errors: usize,
    pub attempts: u32,
    pub fix_rounds: u32,
    pub max_lines: usize,
    pub max_files: usize,
    pub error_chars: usize,
    pub context_bytes: usize,
    pub auto_fix: bool,
    pub fix_warnings: bool,
    pub dump_prompt: bool,
    pub backup_dir: PathBuf,
    pub assistant: AssistantConfig,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let repo_root = safety::absolutize(cli.repo.as_deref().unwrap_or(cwd.as_path()));
        if !repo_root.is_dir() {
            return Err(Error::Config(format!(
                "repository root is not a directory: {}",
                repo_root.display()
            )));
        }

        let file_config = match cli.config {
            Some(ref path) => {
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.clone()));
                }
                parse_config(&std::fs::read_to_string(path)?)?
            }
            None => {
                let path = default_config_path(&repo_root);
                if path.exists() {
                    parse_config(&std::fs::read_to_string(&path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        merge(file_config, cli, repo_root, &EnvDefaults::from_env())
    }

    pub fn is_lint(&self) -> bool {
        self.task.as_ref().is_some_and(TaskSpec::is_lint)
    }
}

/// `<repo>/.fixloop/config.toml`
pub fn default_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".fixloop").join("config.toml")
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    let positive = [
        ("max_errors", config.max_errors.map(|v| v as u64)),
        ("attempts", config.attempts.map(u64::from)),
        ("fix_rounds", config.fix_rounds.map(u64::from)),
        ("max_lines", config.max_lines.map(|v| v as u64)),
    ];
    for (key, value) in positive {
        if value == Some(0) {
            return Err(Error::Config(format!("{key} must be > 0")));
        }
    }
    if let Some(ref dir) = config.backup_dir
        && (dir.trim().is_empty() || Path::new(dir).is_absolute())
    {
        return Err(Error::Config(format!(
            "backup_dir must be a relative path inside the repository: {dir:?}"
        )));
    }
    for (name, command) in &config.tasks {
        if command.trim().is_empty() {
            return Err(Error::Config(format!("task {name} has an empty command")));
        }
    }

    let assistant = &config.assistant;
    match assistant.kind.as_deref() {
        None | Some("http") => {}
        Some("command") => {
            if assistant.binary.as_deref().is_none_or(|b| b.trim().is_empty()) {
                return Err(Error::Config(
                    "assistant.binary is required when assistant.kind = \"command\"".to_string(),
                ));
            }
        }
        Some(other) => {
            return Err(Error::Config(format!(
                "unknown assistant kind: {other} (expected: http, command)"
            )));
        }
    }
    if let Some(t) = assistant.temperature
        && !(0.0..=2.0).contains(&t)
    {
        return Err(Error::Config(format!(
            "assistant.temperature must be between 0 and 2, got {t}"
        )));
    }
    if assistant.timeout_secs == Some(0) {
        return Err(Error::Config("assistant.timeout_secs must be > 0".to_string()));
    }
    Ok(())
}

/// CLI wins, then the file, then the environment, then built-in defaults.
pub fn merge(file: ConfigFile, cli: &Cli, repo_root: PathBuf, env: &EnvDefaults) -> Result<Config> {
    let default_args = RunArgs::default();
    let (run, global_max_errors, global_max_lines) = match &cli.command {
        CliCommand::Run(args) => (args, None, None),
        CliCommand::Apply { max_lines, .. } => (&default_args, None, *max_lines),
        CliCommand::Errors { max_errors, .. } => (&default_args, *max_errors, None),
    };

    let task = match cli.command {
        CliCommand::Run(_) => Some(TaskSpec::resolve(
            run.task.as_deref(),
            run.cmd.as_deref(),
            &file.tasks,
        )?),
        _ => None,
    };
    let lint = task.as_ref().is_some_and(TaskSpec::is_lint);
    let default_attempts = if lint {
        DEFAULT_LINT_ATTEMPTS
    } else {
        DEFAULT_ATTEMPTS
    };

    let assistant_file = file.assistant;
    let kind = match assistant_file.kind.as_deref() {
        Some("command") => AssistantKind::Command,
        _ => AssistantKind::Http,
    };
    let assistant = AssistantConfig {
        kind,
        url: run
            .assistant_url
            .clone()
            .or(assistant_file.url)
            .or_else(|| env.url.clone())
            .unwrap_or_else(|| DEFAULT_URL.to_string()),
        model: run
            .model
            .clone()
            .or(assistant_file.model)
            .or_else(|| env.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        num_ctx: assistant_file.num_ctx.unwrap_or(DEFAULT_NUM_CTX),
        num_predict: assistant_file.num_predict.unwrap_or(DEFAULT_NUM_PREDICT),
        temperature: assistant_file.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        timeout: assistant_file.timeout_secs.map(Duration::from_secs),
        binary: assistant_file.binary,
        args: assistant_file.args.unwrap_or_default(),
    };

    Ok(Config {
        repo_root,
        task,
        max_errors: run
            .max_errors
            .or(global_max_errors)
            .map(|v| v as usize)
            .or(file.max_errors)
            .unwrap_or(DEFAULT_MAX_ERRORS),
        attempts: run.attempts.or(file.attempts).unwrap_or(default_attempts),
        fix_rounds: run.fix_rounds.or(file.fix_rounds).unwrap_or(DEFAULT_FIX_ROUNDS),
        max_lines: run
            .max_lines
            .or(global_max_lines)
            .map(|v| v as usize)
            .or(file.max_lines)
            .unwrap_or(DEFAULT_MAX_LINES),
        max_files: run
            .max_files
            .map(|v| v as usize)
            .or(file.max_files)
            .unwrap_or(DEFAULT_MAX_FILES),
        error_chars: file.error_chars.unwrap_or(DEFAULT_ERROR_CHARS),
        context_bytes: file.context_bytes.unwrap_or(DEFAULT_CONTEXT_BYTES),
        auto_fix: run.auto_flag().or(file.auto_fix).unwrap_or(lint),
        fix_warnings: run
            .fix_warnings_flag()
            .or(file.fix_warnings)
            .unwrap_or(lint),
        dump_prompt: run.dump_prompt || file.dump_prompt.unwrap_or(false),
        backup_dir: PathBuf::from(
            file.backup_dir
                .unwrap_or_else(|| DEFAULT_BACKUP_AREA.to_string()),
        ),
        assistant,
    })
}
