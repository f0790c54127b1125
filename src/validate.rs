//! Gatekeeping for assistant output before it gets anywhere near the tree.

use std::collections::BTreeSet;

use tracing::debug;

use crate::diff;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid,
    InvalidFormat,
    NoOp,
    OutOfScope(Vec<String>),
}

/// One assistant response and what the validator made of it.
#[derive(Debug, Clone)]
pub struct PatchAttempt {
    /// 1-based count of assistant responses over the whole run.
    pub attempt_number: u32,
    pub raw_response: String,
    pub cleaned_diff: String,
    pub validity: Validity,
    pub target_files: BTreeSet<String>,
}

impl PatchAttempt {
    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }

    /// The cleaned diff if valid, otherwise the rejection as an error.
    pub fn into_diff(self) -> Result<String> {
        match self.validity {
            Validity::Valid => Ok(self.cleaned_diff),
            Validity::InvalidFormat => Err(Error::PatchFormatInvalid(
                "output was not a unified diff with ---/+++ headers".to_string(),
            )),
            Validity::NoOp => Err(Error::PatchNoOp),
            Validity::OutOfScope(files) => Err(Error::PatchOutOfScope(files)),
        }
    }
}

/// Clean and classify a raw response against the allowed file set.
///
/// Checks run in order: format, no-op, scope. The first failure wins.
pub fn validate(attempt_number: u32, raw: &str, allowed: &[String]) -> PatchAttempt {
    let cleaned = clean(raw);
    let target_files = files_of(&cleaned);

    let validity = if !is_well_formed(&cleaned) || target_files.is_empty() {
        Validity::InvalidFormat
    } else if is_no_op(&cleaned) {
        Validity::NoOp
    } else {
        match check_scope(&target_files, allowed) {
            Ok(()) => Validity::Valid,
            Err(violators) => Validity::OutOfScope(violators),
        }
    };
    debug!(attempt_number, ?validity, files = ?target_files, "validated assistant patch");

    PatchAttempt {
        attempt_number,
        raw_response: raw.to_string(),
        cleaned_diff: cleaned,
        validity,
        target_files,
    }
}

/// Strip everything that is not unified-diff text: markdown fences, prose,
/// and `diff --git` / `index` / mode banners. Lines before the first `--- `
/// header are dropped.
pub fn clean(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines
        .iter()
        .position(|l| l.starts_with("--- "))
        .unwrap_or(0);

    let kept: Vec<&str> = lines[start..]
        .iter()
        .copied()
        .filter(|line| is_diff_line(line))
        .collect();

    let body = kept.join("\n");
    let body = body.trim_matches(|c: char| c == '\n' || c == '\r');
    format!("{body}\n")
}

fn is_diff_line(line: &str) -> bool {
    if line.is_empty() {
        // An empty context line whose leading space was lost.
        return true;
    }
    if line.starts_with("```") || line.starts_with("diff ") || line.trim() == "diff" {
        return false;
    }
    line.starts_with("--- ")
        || line.starts_with("+++ ")
        || line.starts_with("@@")
        || line.starts_with('+')
        || line.starts_with('-')
        || line.starts_with(' ')
        || line.starts_with('\\')
}

/// At least one `--- ` header immediately followed by a `+++ ` header.
pub fn is_well_formed(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().collect();
    lines
        .windows(2)
        .any(|w| w[0].starts_with("--- ") && w[1].starts_with("+++ "))
}

/// True when no line actually changes: every group of adjacent removed and
/// added lines pairs up one-to-one with identical trimmed content.
pub fn is_no_op(text: &str) -> bool {
    let mut removed: Vec<&str> = Vec::new();
    let mut added: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.starts_with('-') && !line.starts_with("---") {
            removed.push(&line[1..]);
        } else if line.starts_with('+') && !line.starts_with("+++") {
            added.push(&line[1..]);
        } else {
            if group_changes(&removed, &added) {
                return false;
            }
            removed.clear();
            added.clear();
        }
    }
    !group_changes(&removed, &added)
}

fn group_changes(removed: &[&str], added: &[&str]) -> bool {
    if removed.len() != added.len() {
        return true;
    }
    removed
        .iter()
        .zip(added)
        .any(|(r, a)| r.trim() != a.trim())
}

/// Files the diff touches, with the same rules as [`diff::inspect`].
pub fn files_of(text: &str) -> BTreeSet<String> {
    diff::files_of(text)
}

/// `Err(violators)` for every file not in `allowed`.
pub fn check_scope(
    files: &BTreeSet<String>,
    allowed: &[String],
) -> std::result::Result<(), Vec<String>> {
    let allowed: BTreeSet<String> = allowed.iter().map(|f| normalize(f)).collect();
    let violators: Vec<String> = files
        .iter()
        .filter(|f| !allowed.contains(&normalize(f)))
        .cloned()
        .collect();
    if violators.is_empty() {
        Ok(())
    } else {
        Err(violators)
    }
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.strip_prefix("./").unwrap_or(&path).to_string()
}
