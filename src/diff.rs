//! Unified diff inspection.
//!
//! Only header syntax matters here: which files a diff names and how many
//! lines it adds or removes. Hunk bodies are never validated.

use std::collections::BTreeSet;

const NULL_DEVICE: &str = "/dev/null";

/// Files touched by a diff and its change volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffFact {
    pub files: BTreeSet<String>,
    pub added_lines: usize,
    pub removed_lines: usize,
}

impl DiffFact {
    pub fn changed_lines(&self) -> usize {
        self.added_lines + self.removed_lines
    }
}

/// Path prefix convention in use. Decides the strip level for both
/// inspection and `git apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixStyle {
    /// `--- a/path` / `+++ b/path` (strip one component, `-p1`).
    Prefixed,
    /// `--- path` / `+++ path` (`-p0`).
    Plain,
}

impl PrefixStyle {
    /// Prefixed if the `a/`/`b/` markers appear anywhere in the text.
    pub fn detect(text: &str) -> Self {
        if text.contains("--- a/") || text.contains("+++ b/") {
            PrefixStyle::Prefixed
        } else {
            PrefixStyle::Plain
        }
    }

    pub fn strip_level(self) -> usize {
        match self {
            PrefixStyle::Prefixed => 1,
            PrefixStyle::Plain => 0,
        }
    }

    pub fn git_arg(self) -> &'static str {
        match self {
            PrefixStyle::Prefixed => "-p1",
            PrefixStyle::Plain => "-p0",
        }
    }
}

/// Scan diff text into a [`DiffFact`]. Pure and deterministic.
pub fn inspect(text: &str) -> DiffFact {
    let style = PrefixStyle::detect(text);
    let mut fact = DiffFact::default();

    for line in text.lines() {
        if let Some(path) = header_path(line, "+++ ").or_else(|| header_path(line, "--- ")) {
            if let Some(rel) = normalize_header_path(path, style) {
                fact.files.insert(rel);
            }
            continue;
        }
        if line.starts_with('+') && !line.starts_with("+++") {
            fact.added_lines += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            fact.removed_lines += 1;
        }
    }

    fact
}

/// Touched files, as [`inspect`] sees them.
pub fn files_of(text: &str) -> BTreeSet<String> {
    inspect(text).files
}

fn header_path<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(marker)?;
    // `--- a/file\t2024-01-01 10:00:00` carries a timestamp after a tab.
    let path = rest.split('\t').next().unwrap_or(rest).trim();
    (!path.is_empty()).then_some(path)
}

fn normalize_header_path(path: &str, style: PrefixStyle) -> Option<String> {
    if path == NULL_DEVICE {
        return None;
    }
    let path = path.replace('\\', "/");
    let is_absolute = path.starts_with('/') || path.as_bytes().get(1) == Some(&b':');
    let stripped = if is_absolute {
        path
    } else {
        strip_components(&path, style.strip_level())
    };
    let stripped = stripped.strip_prefix("./").unwrap_or(&stripped).to_string();
    (!stripped.is_empty()).then_some(stripped)
}

fn strip_components(path: &str, level: usize) -> String {
    let mut rest = path;
    for _ in 0..level {
        match rest.split_once('/') {
            Some((_, tail)) => rest = tail,
            None => break,
        }
    }
    rest.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIXED: &str = "\
--- a/src/app.ts
+++ b/src/app.ts
@@ -1,3 +1,3 @@
 import x from 'x';
-const a = 1;
+const a = 2;
+const b = 3;
";

    #[test]
    fn test_inspect_prefixed() {
        let fact = inspect(PREFIXED);
        assert_eq!(fact.files, BTreeSet::from(["src/app.ts".to_string()]));
        assert_eq!(fact.added_lines, 2);
        assert_eq!(fact.removed_lines, 1);
        assert_eq!(fact.changed_lines(), 3);
    }

    #[test]
    fn test_inspect_plain() {
        let diff = "--- src/a.ts\n+++ src/a.ts\n@@\n-x\n+y\n";
        assert_eq!(PrefixStyle::detect(diff), PrefixStyle::Plain);
        let fact = inspect(diff);
        assert_eq!(fact.files, BTreeSet::from(["src/a.ts".to_string()]));
    }

    #[test]
    fn test_new_file_ignores_null_device() {
        let diff = "--- /dev/null\n+++ b/src/new.ts\n@@ -0,0 +1 @@\n+export {};\n";
        let fact = inspect(diff);
        assert_eq!(fact.files, BTreeSet::from(["src/new.ts".to_string()]));
        assert_eq!(fact.added_lines, 1);
        assert_eq!(fact.removed_lines, 0);
    }

    #[test]
    fn test_rename_records_both_sides() {
        let diff = "--- a/old.ts\n+++ b/new.ts\n@@\n-a\n+b\n";
        let files = files_of(diff);
        assert!(files.contains("old.ts"));
        assert!(files.contains("new.ts"));
    }

    #[test]
    fn test_header_timestamp_stripped() {
        let diff = "--- a/x.rs\t2024-01-01 10:00:00\n+++ b/x.rs\t2024-01-01 10:00:01\n";
        assert_eq!(files_of(diff), BTreeSet::from(["x.rs".to_string()]));
    }

    #[test]
    fn test_escape_paths_survive_for_gate() {
        let diff = "--- a/../../etc/passwd\n+++ b/../../etc/passwd\n@@\n-root\n+evil\n";
        assert_eq!(
            files_of(diff),
            BTreeSet::from(["../../etc/passwd".to_string()])
        );
        let diff = "--- /etc/passwd\n+++ /etc/passwd\n@@\n-root\n+evil\n";
        assert_eq!(files_of(diff), BTreeSet::from(["/etc/passwd".to_string()]));
    }

    #[test]
    fn test_multi_file() {
        let diff = format!("{PREFIXED}--- a/src/b.ts\n+++ b/src/b.ts\n@@\n-1\n+2\n");
        let fact = inspect(&diff);
        assert_eq!(fact.files.len(), 2);
        assert_eq!(fact.added_lines, 3);
        assert_eq!(fact.removed_lines, 2);
    }

    #[test]
    fn test_inspection_is_deterministic() {
        assert_eq!(files_of(PREFIXED), files_of(PREFIXED));
        assert_eq!(inspect(PREFIXED), inspect(PREFIXED));
    }

    #[test]
    fn test_strip_level_and_git_arg() {
        assert_eq!(PrefixStyle::detect(PREFIXED), PrefixStyle::Prefixed);
        assert_eq!(PrefixStyle::Prefixed.strip_level(), 1);
        assert_eq!(PrefixStyle::Prefixed.git_arg(), "-p1");
        assert_eq!(PrefixStyle::Plain.git_arg(), "-p0");
    }
}
