use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::backup::{BackupVault, Snapshot};
use crate::diff::{self, DiffFact, PrefixStyle};
use crate::error::{Error, Result};
use crate::process::{ProcessConfig, ProcessOutput, spawn_and_stream};
use crate::safety;

/// The external "apply a unified diff" primitive.
pub trait PatchTool {
    /// Fail with `ToolUnavailable` if the primitive cannot be run at all.
    fn ensure_available(&self) -> impl Future<Output = Result<()>> + Send;

    /// Dry run against the current tree. Never mutates.
    fn check(&self, diff: &str, style: PrefixStyle) -> impl Future<Output = Result<()>> + Send;

    /// Real application.
    fn apply(&self, diff: &str, style: PrefixStyle) -> impl Future<Output = Result<()>> + Send;
}

/// `git apply` run inside the repository root, diff fed on stdin.
pub struct GitApplier {
    root: PathBuf,
    git_binary: String,
}

impl GitApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            git_binary: "git".to_string(),
        }
    }

    pub fn with_binary(mut self, git_binary: impl Into<String>) -> Self {
        self.git_binary = git_binary.into();
        self
    }

    /// Arguments for `git apply`; `--check` for the dry run.
    pub fn build_args(style: PrefixStyle, dry_run: bool) -> Vec<String> {
        let mut args = vec!["apply".to_string()];
        if dry_run {
            args.push("--check".to_string());
        }
        args.push("--ignore-space-change".to_string());
        args.push(style.git_arg().to_string());
        args
    }

    async fn run_git(&self, diff: &str, style: PrefixStyle, dry_run: bool) -> Result<ProcessOutput> {
        let config = ProcessConfig {
            command: self.git_binary.clone(),
            args: Self::build_args(style, dry_run),
            working_dir: self.root.clone(),
            timeout: None,
            log_prefix: if dry_run { "git-apply-check" } else { "git-apply" }.to_string(),
            env: vec![],
            stdin_data: Some(diff.to_string()),
        };
        spawn_and_stream(config).await
    }
}

impl PatchTool for GitApplier {
    async fn ensure_available(&self) -> Result<()> {
        let config = ProcessConfig {
            command: self.git_binary.clone(),
            args: vec!["--version".to_string()],
            working_dir: self.root.clone(),
            timeout: None,
            log_prefix: "git".to_string(),
            env: vec![],
            stdin_data: None,
        };
        match spawn_and_stream(config).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(Error::ToolUnavailable(format!(
                "{} --version exited with code {}",
                self.git_binary, output.exit_code
            ))),
            Err(e) => Err(Error::ToolUnavailable(format!(
                "{} not available, install git to apply patches safely: {e}",
                self.git_binary
            ))),
        }
    }

    async fn check(&self, diff: &str, style: PrefixStyle) -> Result<()> {
        let output = self
            .run_git(diff, style, true)
            .await
            .map_err(|e| Error::ApplyCheckFailed(e.to_string()))?;
        if output.signal == Some(libc::SIGINT) {
            return Err(Error::Interrupted);
        }
        if output.success() {
            Ok(())
        } else {
            Err(Error::ApplyCheckFailed(output.diagnostic()))
        }
    }

    async fn apply(&self, diff: &str, style: PrefixStyle) -> Result<()> {
        let output = self
            .run_git(diff, style, false)
            .await
            .map_err(|e| Error::ApplyFailed(e.to_string()))?;
        if output.signal == Some(libc::SIGINT) {
            return Err(Error::Interrupted);
        }
        if output.success() {
            Ok(())
        } else {
            Err(Error::ApplyFailed(output.diagnostic()))
        }
    }
}

/// A diff that is now in the working tree, with the snapshot that can undo it.
#[derive(Debug)]
pub struct AppliedPatch {
    pub fact: DiffFact,
    pub snapshot: Snapshot,
}

impl AppliedPatch {
    /// Keep the mutation and drop the backup.
    pub fn commit(self) -> Result<()> {
        self.snapshot.discard()
    }

    /// Undo the mutation, byte for byte.
    pub fn revert(self) -> Result<()> {
        self.snapshot.restore()
    }
}

/// Apply `diff` under `root` with every guard in front of the mutation:
/// SafetyGate (containment, volume), dry-run check, backup, real apply.
///
/// Any failure before the real apply leaves the tree untouched and no backup
/// behind. A failing real apply is rolled back from the backup and reported
/// as [`Error::ApplyFailed`].
pub async fn apply_guarded<P: PatchTool>(
    tool: &P,
    root: &Path,
    backup_area: &Path,
    diff: &str,
    max_lines: usize,
) -> Result<AppliedPatch> {
    let fact = diff::inspect(diff);
    if fact.files.is_empty() {
        return Err(Error::PatchFormatInvalid("diff names no files".to_string()));
    }
    safety::check_paths(root, &fact.files)?;
    safety::check_volume(&fact, max_lines)?;

    let style = PrefixStyle::detect(diff);
    tool.check(diff, style).await?;

    let snapshot = BackupVault::new(root, backup_area).snapshot(&fact.files)?;

    if let Err(e) = tool.apply(diff, style).await {
        error!(error = %e, "patch apply failed after a clean check; restoring backup");
        if let Err(restore_err) = snapshot.restore() {
            return Err(Error::ApplyFailed(format!("{e}; additionally {restore_err}")));
        }
        return Err(e);
    }

    info!(
        files = fact.files.len(),
        added = fact.added_lines,
        removed = fact.removed_lines,
        "patch applied"
    );
    Ok(AppliedPatch { fact, snapshot })
}
