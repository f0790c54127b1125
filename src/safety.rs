//! Containment and volume checks that run before any file-system mutation.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::diff::DiffFact;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_LINES: usize = 500;

/// Make `path` absolute against the current directory without touching the
/// file system beyond `current_dir`.
pub fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    normalize(&joined)
}

/// Lexically resolve `.` and `..` components. `..` never climbs above the
/// root component.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True iff `rel_path` resolved under `root` is `root` itself or a strict
/// descendant of it.
///
/// Absolute `rel_path`s are resolved as-is, so they only pass when they
/// already point inside `root`. When part of the target exists, its
/// symlink-resolved location must stay inside the canonical root too.
pub fn is_contained(root: &Path, rel_path: &str) -> bool {
    let root_abs = absolutize(root);
    let full = normalize(&root_abs.join(rel_path));
    if !full.starts_with(&root_abs) {
        return false;
    }

    let Ok(root_real) = root_abs.canonicalize() else {
        return true;
    };
    match deepest_existing(&full).and_then(|p| p.canonicalize().ok()) {
        Some(real) => real.starts_with(&root_real),
        None => true,
    }
}

fn deepest_existing(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(p) = current {
        if p.symlink_metadata().is_ok() {
            return Some(p.to_path_buf());
        }
        current = p.parent();
    }
    None
}

/// Reject the whole set if any path escapes `root`.
pub fn check_paths<'a>(root: &Path, files: impl IntoIterator<Item = &'a String>) -> Result<()> {
    for file in files {
        if !is_contained(root, file) {
            warn!(file = %file, "refusing to touch path outside repository");
            return Err(Error::SafetyViolation(format!(
                "refusing to touch outside repo: {file}"
            )));
        }
    }
    Ok(())
}

/// Reject diffs whose total changed lines exceed `max_lines`.
pub fn check_volume(fact: &DiffFact, max_lines: usize) -> Result<()> {
    let changed = fact.changed_lines();
    if changed > max_lines {
        warn!(changed, max_lines, "diff exceeds change ceiling");
        return Err(Error::SafetyViolation(format!(
            "{changed} changed lines exceed limit {max_lines}"
        )));
    }
    Ok(())
}
