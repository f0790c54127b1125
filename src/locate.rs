//! Error location extraction from raw tool output.
//!
//! A small ordered set of strategies scans the same text; their hits are
//! merged by `(file, line, col)` in order of first appearance.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::safety;

/// A single `file:line[:col]` location reported by a tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorRef {
    pub file: String,
    pub line: u32,
    pub col: Option<u32>,
}

impl fmt::Display for ErrorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.col {
            Some(col) => write!(f, "{}:{}:{}", self.file, self.line, col),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// A location plus the byte offset it was found at.
type Hit = (usize, ErrorRef);

type Strategy = fn(&str) -> Vec<Hit>;

/// Tried in this order; ties on offset keep strategy order.
const STRATEGIES: &[Strategy] = &[inline_locations, linter_records];

// Each shape must be preceded by start-of-line or a delimiter so a path is
// never picked up from the middle of another token, and must end in a file
// extension so prose is not mistaken for a path.
static INLINE_SHAPES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Drive-rooted: C:\dir\file.ts:12:4 (spaces allowed inside)
        r"(?m)(?:^|[\s'`(\[<])([A-Za-z]:\\[^:\r\n]+?\.[A-Za-z0-9]+):(\d+)(?::(\d+))?",
        // POSIX-rooted: /home/me/file.ts:12:4
        r"(?m)(?:^|[\s'`(\[<])(/[^\s:'`()\[\]<>]+\.[A-Za-z0-9]+):(\d+)(?::(\d+))?",
        // Relative: src/file.ts:12:4 or ./src/file.ts:12
        r#"(?m)(?:^|[\s'"`(\[<])([A-Za-z0-9_.\-][^\s:'"`()\[\]<>\\]*\.[A-Za-z][A-Za-z0-9]*):(\d+)(?::(\d+))?"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("inline location pattern is valid"))
    .collect()
});

static BARE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z]:\\[^:\r\n]+|[^\s:]+)\.[A-Za-z0-9]+$")
        .expect("bare path pattern is valid")
});

static ROW_COL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d+)").expect("row:col pattern is valid"));

/// Extract up to `max` distinct error locations from combined tool output.
///
/// An empty result means the output could not be grounded in any location;
/// callers must not treat that as success when the tool failed.
pub fn locate_errors(output: &str, max: usize) -> Vec<ErrorRef> {
    let mut hits: Vec<Hit> = STRATEGIES
        .iter()
        .flat_map(|strategy| strategy(output))
        .collect();
    // Stable: equal offsets keep the order strategies produced them in.
    hits.sort_by_key(|(offset, _)| *offset);

    let mut seen = HashSet::new();
    hits.into_iter()
        .map(|(_, r)| r)
        .filter(|r| seen.insert(r.clone()))
        .take(max)
        .collect()
}

/// `path:line[:col]` tokens anywhere in the text.
fn inline_locations(output: &str) -> Vec<Hit> {
    let mut hits = Vec::new();
    for re in INLINE_SHAPES.iter() {
        for caps in re.captures_iter(output) {
            let (Some(file), Some(line)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let Ok(line_no) = line.as_str().parse() else {
                continue;
            };
            let col = caps.get(3).and_then(|c| c.as_str().parse().ok());
            hits.push((
                file.start(),
                ErrorRef {
                    file: normalize_file(file.as_str()),
                    line: line_no,
                    col,
                },
            ));
        }
    }
    hits
}

/// eslint "stylish" style records:
///
/// ```text
/// ./src/app.tsx
///   12:34  Warning: ...
/// ```
fn linter_records(output: &str) -> Vec<Hit> {
    let mut hits = Vec::new();
    let mut offset = 0;
    let lines: Vec<&str> = output.split_inclusive('\n').collect();
    for pair in lines.windows(2) {
        let path_line = pair[0].trim();
        let pos_line = pair[1].trim();
        let here = offset;
        offset += pair[0].len();

        if path_line.is_empty() || !BARE_PATH.is_match(path_line) {
            continue;
        }
        let Some(caps) = ROW_COL.captures(pos_line) else {
            continue;
        };
        let (Ok(line), Ok(col)) = (caps[1].parse(), caps[2].parse()) else {
            continue;
        };
        hits.push((
            here,
            ErrorRef {
                file: normalize_file(path_line),
                line,
                col: Some(col),
            },
        ));
    }
    hits
}

fn normalize_file(raw: &str) -> String {
    raw.strip_prefix("./").unwrap_or(raw).to_string()
}

/// Map a reported file to a `/`-separated path relative to `root`.
///
/// Returns `None` for files that resolve outside the repository.
pub fn to_repo_relative(root: &Path, file: &str) -> Option<String> {
    if looks_drive_rooted(file) && !cfg!(windows) {
        return None;
    }
    let root_abs = safety::absolutize(root);
    let full = safety::normalize(&root_abs.join(file));
    let rel = full.strip_prefix(&root_abs).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    Some(rel.to_string_lossy().replace('\\', "/"))
}

fn looks_drive_rooted(file: &str) -> bool {
    let bytes = file.as_bytes();
    bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\'
}

/// Distinct repo-relative files among `refs`, in order, capped at `max_files`
/// (0 means no cap).
pub fn target_files(root: &Path, refs: &[ErrorRef], max_files: usize) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for r in refs {
        if let Some(rel) = to_repo_relative(root, &r.file)
            && !files.contains(&rel)
        {
            files.push(rel);
        }
    }
    if max_files > 0 {
        files.truncate(max_files);
    }
    files
}

/// Whether the output mentions warnings at all.
pub fn has_warnings(output: &str) -> bool {
    output.lines().any(|line| {
        let lower = line.to_ascii_lowercase();
        lower.contains("warning:") || lower.contains(" warning ")
    })
}
