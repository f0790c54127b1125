use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;

const PATCH_FILE: &str = "auto.patch";
const LAST_PROMPT_FILE: &str = "auto.last.prompt.txt";
const LAST_RESPONSE_FILE: &str = "auto.last.response.txt";
const LAST_CLEANED_FILE: &str = "auto.last.cleaned.diff";

/// Persists loop artifacts under `.fixloop/` in the repo.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default artifact directory relative to a repo root.
    pub fn default_dir(repo_root: &Path) -> PathBuf {
        repo_root.join(".fixloop")
    }

    pub fn patch_path(&self) -> PathBuf {
        self.dir.join(PATCH_FILE)
    }

    /// Store the diff about to be applied.
    pub fn write_patch(&self, diff: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.patch_path();
        fs::write(&path, diff)?;
        debug!(path = %path.display(), "patch saved");
        Ok(path)
    }

    /// Dump the last prompt, raw response and cleaned diff for inspection.
    pub fn write_exchange(&self, prompt: &str, raw: &str, cleaned: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(LAST_PROMPT_FILE), prompt)?;
        fs::write(self.dir.join(LAST_RESPONSE_FILE), raw)?;
        fs::write(self.dir.join(LAST_CLEANED_FILE), cleaned)?;
        info!(dir = %self.dir.display(), "prompt and response saved");
        Ok(())
    }
}
