//! Pre-mutation snapshots of the files a patch is about to touch.
//!
//! Layout: `<root>/<area>/<timestamp>/<relative path>`. A [`Snapshot`] is
//! owned by the apply that created it and is consumed by exactly one of
//! [`Snapshot::discard`], [`Snapshot::restore`] or [`Snapshot::keep`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::safety;

pub const DEFAULT_BACKUP_AREA: &str = ".fixloop/backup";

#[derive(Debug, Clone)]
struct Entry {
    rel: String,
    existed: bool,
    /// Highest missing ancestor directory of a new file; removed on restore.
    created_dir: Option<PathBuf>,
}

/// Takes snapshots under `<root>/<area>`.
pub struct BackupVault {
    root: PathBuf,
    area: PathBuf,
}

impl BackupVault {
    pub fn new(root: impl Into<PathBuf>, area: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            area: area.into(),
        }
    }

    /// Copy the current bytes of every existing file in `files` into a fresh
    /// timestamped directory. Files that do not exist yet are recorded so a
    /// restore can remove them again.
    ///
    /// Any path outside the root, or any failed copy, aborts the whole
    /// snapshot and removes the partial backup.
    pub fn snapshot<'a>(&self, files: impl IntoIterator<Item = &'a String>) -> Result<Snapshot> {
        let files: Vec<&String> = files.into_iter().collect();
        let area = self.area.to_string_lossy();
        if !safety::is_contained(&self.root, &area) {
            return Err(Error::Backup(format!(
                "backup area escapes repository: {area}"
            )));
        }
        safety::check_paths(&self.root, files.iter().copied())
            .map_err(|e| Error::Backup(e.to_string()))?;

        let dir = self.fresh_dir()?;
        match self.copy_all(&dir, &files) {
            Ok(entries) => {
                info!(
                    dir = %dir.display(),
                    files = entries.iter().filter(|e| e.existed).count(),
                    "backup created"
                );
                Ok(Snapshot {
                    root: self.root.clone(),
                    dir,
                    entries,
                })
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    warn!(dir = %dir.display(), error = %cleanup, "failed to remove partial backup");
                }
                Err(e)
            }
        }
    }

    fn fresh_dir(&self) -> Result<PathBuf> {
        let base = self.root.join(&self.area);
        let stamp = backup_stamp();
        let mut dir = base.join(&stamp);
        let mut n = 1;
        while dir.exists() {
            dir = base.join(format!("{stamp}-{n}"));
            n += 1;
        }
        fs::create_dir_all(&dir).map_err(|e| {
            Error::Backup(format!("failed to create backup dir {}: {e}", dir.display()))
        })?;
        Ok(dir)
    }

    fn copy_all(&self, dir: &Path, files: &[&String]) -> Result<Vec<Entry>> {
        let mut entries = Vec::with_capacity(files.len());
        for rel in files {
            let src = self.root.join(rel.as_str());
            if !src.exists() {
                debug!(file = %rel, "new file, nothing to back up");
                entries.push(Entry {
                    rel: rel.to_string(),
                    existed: false,
                    created_dir: highest_missing_dir(&self.root, &src),
                });
                continue;
            }
            let dst = dir.join(rel.as_str());
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Backup(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
            fs::copy(&src, &dst)
                .map_err(|e| Error::Backup(format!("failed to back up {rel}: {e}")))?;
            entries.push(Entry {
                rel: rel.to_string(),
                existed: true,
                created_dir: None,
            });
        }
        Ok(entries)
    }
}

/// ISO-8601 UTC timestamp with `:` and `.` replaced, safe as a directory name.
pub fn backup_stamp() -> String {
    Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

fn highest_missing_dir(root: &Path, file: &Path) -> Option<PathBuf> {
    let mut highest = None;
    let mut current = file.parent();
    while let Some(dir) = current {
        if dir == root || dir.exists() {
            break;
        }
        highest = Some(dir.to_path_buf());
        current = dir.parent();
    }
    highest
}

/// An immutable copy of the files a patch is about to touch.
#[derive(Debug)]
pub struct Snapshot {
    root: PathBuf,
    dir: PathBuf,
    entries: Vec<Entry>,
}

impl Snapshot {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Relative paths covered by this snapshot, including new files.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.rel.as_str())
    }

    /// Number of files whose bytes were copied.
    pub fn backed_up_count(&self) -> usize {
        self.entries.iter().filter(|e| e.existed).count()
    }

    /// Put every file back to its captured bytes, remove files the patch
    /// created, then delete the backup.
    ///
    /// On failure the backup directory is left in place for manual recovery.
    pub fn restore(self) -> Result<()> {
        let mut failures = Vec::new();
        for entry in &self.entries {
            let target = self.root.join(&entry.rel);
            let result = if entry.existed {
                restore_file(&self.dir.join(&entry.rel), &target)
            } else {
                remove_created(&target, entry.created_dir.as_deref())
            };
            if let Err(e) = result {
                warn!(file = %entry.rel, error = %e, "failed to restore file");
                failures.push(format!("{}: {e}", entry.rel));
            }
        }

        if !failures.is_empty() {
            return Err(Error::Backup(format!(
                "restore incomplete ({}); backup kept at {}",
                failures.join("; "),
                self.dir.display()
            )));
        }

        info!(dir = %self.dir.display(), "working tree restored from backup");
        self.discard()
    }

    /// Drop the backup; the mutation it guarded is being kept.
    pub fn discard(self) -> Result<()> {
        fs::remove_dir_all(&self.dir).map_err(|e| {
            Error::Backup(format!(
                "failed to remove backup {}: {e}",
                self.dir.display()
            ))
        })
    }

    /// Keep the backup on disk and hand back its location.
    pub fn keep(self) -> PathBuf {
        self.dir
    }
}

fn restore_file(backup: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(backup, target)?;
    Ok(())
}

fn remove_created(target: &Path, created_dir: Option<&Path>) -> std::io::Result<()> {
    if target.is_file() {
        fs::remove_file(target)?;
    }
    if let Some(dir) = created_dir
        && dir.exists()
    {
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}
