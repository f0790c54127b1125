use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("assistant error: {0}")]
    Assistant(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("no error locations: {0}")]
    NoErrorLocations(String),

    #[error("patch format invalid: {0}")]
    PatchFormatInvalid(String),

    #[error("patch contains no actual changes")]
    PatchNoOp,

    #[error("patch touched unexpected files: {}", .0.join(", "))]
    PatchOutOfScope(Vec<String>),

    #[error("safety gate rejected patch: {0}")]
    SafetyViolation(String),

    #[error("patch does not apply cleanly: {0}")]
    ApplyCheckFailed(String),

    #[error("patch apply failed after a successful check (working tree may need manual repair): {0}")]
    ApplyFailed(String),

    #[error("no improvement: {before} -> {after} errors")]
    NoImprovement { before: usize, after: usize },

    #[error("backup error: {0}")]
    Backup(String),

    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// Errors that are fed back to the assistant and retried within the
    /// fix-round budget.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PatchFormatInvalid(_)
                | Error::PatchNoOp
                | Error::PatchOutOfScope(_)
                | Error::Assistant(_)
                | Error::NoImprovement { .. }
        )
    }

    /// One-line note describing why the previous attempt was rejected.
    pub fn feedback_note(&self) -> String {
        match self {
            Error::PatchFormatInvalid(_) => {
                "Output was not a unified diff with ---/+++ headers.".to_string()
            }
            Error::PatchNoOp => {
                "Diff contains no actual changes (no-op diff). The issue was not fixed.".to_string()
            }
            Error::PatchOutOfScope(files) => {
                format!("Patch touched unexpected files: {}", files.join(", "))
            }
            Error::NoImprovement { before, after } => format!(
                "Patch applied but did not reduce the error count ({before} -> {after}). Try a different fix."
            ),
            Error::Assistant(_) => "Previous request failed; answer with a diff only.".to_string(),
            other => other.to_string().lines().next().unwrap_or_default().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
