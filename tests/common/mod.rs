#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

use fixloop::assistant::{DEFAULT_MODEL, DEFAULT_NUM_CTX, DEFAULT_NUM_PREDICT, DEFAULT_TEMPERATURE, DEFAULT_URL};
use fixloop::backup::DEFAULT_BACKUP_AREA;
use fixloop::config::{AssistantConfig, AssistantKind, Config};
use fixloop::request::{DEFAULT_CONTEXT_BYTES, DEFAULT_ERROR_CHARS};
use fixloop::safety::DEFAULT_MAX_LINES;
use fixloop::task::TaskSpec;

pub fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} in {} failed: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Fresh git repository with the given files committed.
pub fn setup_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    run_git(dir.path(), &["init", "-q"]);
    run_git(dir.path(), &["config", "user.email", "test@test.com"]);
    run_git(dir.path(), &["config", "user.name", "Test"]);
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    run_git(dir.path(), &["add", "-A"]);
    run_git(dir.path(), &["commit", "-q", "--allow-empty", "-m", "init"]);
    dir
}

/// Entries under the backup area, zero when it was never created.
pub fn backup_entries(root: &Path) -> usize {
    std::fs::read_dir(root.join(DEFAULT_BACKUP_AREA))
        .map(|dir| dir.count())
        .unwrap_or(0)
}

/// Sensible default `Config` for tests. Callers can override fields via struct update syntax.
pub fn default_test_config(root: &Path) -> Config {
    Config {
        repo_root: root.to_path_buf(),
        task: Some(TaskSpec {
            name: Some("build".to_string()),
            command: "true".to_string(),
        }),
        max_errors: 10,
        attempts: 2,
        fix_rounds: 2,
        max_lines: DEFAULT_MAX_LINES,
        max_files: 1,
        error_chars: DEFAULT_ERROR_CHARS,
        context_bytes: DEFAULT_CONTEXT_BYTES,
        auto_fix: true,
        fix_warnings: false,
        dump_prompt: false,
        backup_dir: DEFAULT_BACKUP_AREA.into(),
        assistant: AssistantConfig {
            kind: AssistantKind::Http,
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            num_ctx: DEFAULT_NUM_CTX,
            num_predict: DEFAULT_NUM_PREDICT,
            temperature: DEFAULT_TEMPERATURE,
            timeout: None,
            binary: None,
            args: vec![],
        },
    }
}
