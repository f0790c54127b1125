mod common;

use std::path::Path;
use std::sync::Mutex;

use fixloop::apply::{GitApplier, PatchTool, apply_guarded};
use fixloop::backup::DEFAULT_BACKUP_AREA;
use fixloop::diff::PrefixStyle;
use fixloop::error::{Error, Result};

const SOURCE: &str = "import x from 'x';\nconst a = 1;\n\tconst  spaced = true;\nexport default a;\n";

const EDIT: &str = "\
--- a/src/a.ts
+++ b/src/a.ts
@@ -1,4 +1,4 @@
 import x from 'x';
-const a = 1;
+const a = 2;
 \tconst  spaced = true;
 export default a;
";

fn area() -> &'static Path {
    Path::new(DEFAULT_BACKUP_AREA)
}

#[tokio::test]
async fn test_volume_ceiling_rejects_before_any_backup() {
    let repo = common::setup_repo(&[("src/a.ts", "ok\n")]);
    let mut diff = String::from("--- a/src/a.ts\n+++ b/src/a.ts\n@@ -1 +1,601 @@\n ok\n");
    for i in 0..600 {
        diff.push_str(&format!("+line {i}\n"));
    }

    let git = GitApplier::new(repo.path());
    let err = apply_guarded(&git, repo.path(), area(), &diff, 500)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SafetyViolation(_)), "{err:?}");
    assert!(err.to_string().contains("600 changed lines exceed limit 500"));
    assert_eq!(common::backup_entries(repo.path()), 0);
    assert_eq!(std::fs::read_to_string(repo.path().join("src/a.ts")).unwrap(), "ok\n");
}

#[tokio::test]
async fn test_path_escape_rejected_before_any_backup() {
    let repo = common::setup_repo(&[("src/a.ts", "ok\n")]);
    let diff = "--- a/../../etc/passwd\n+++ b/../../etc/passwd\n@@ -1 +1 @@\n-root\n+evil\n";

    let git = GitApplier::new(repo.path());
    let err = apply_guarded(&git, repo.path(), area(), diff, 500)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SafetyViolation(_)), "{err:?}");
    assert!(err.to_string().contains("../../etc/passwd"));
    assert_eq!(common::backup_entries(repo.path()), 0);
}

#[tokio::test]
async fn test_revert_restores_exact_bytes() {
    let repo = common::setup_repo(&[("src/a.ts", SOURCE)]);
    let git = GitApplier::new(repo.path());

    let applied = apply_guarded(&git, repo.path(), area(), EDIT, 500)
        .await
        .unwrap();
    let changed = std::fs::read_to_string(repo.path().join("src/a.ts")).unwrap();
    assert!(changed.contains("const a = 2;"));
    assert_eq!(applied.fact.added_lines, 1);
    assert_eq!(applied.snapshot.backed_up_count(), 1);
    assert_eq!(common::backup_entries(repo.path()), 1);

    applied.revert().unwrap();
    assert_eq!(std::fs::read(repo.path().join("src/a.ts")).unwrap(), SOURCE.as_bytes());
    assert_eq!(common::backup_entries(repo.path()), 0);
}

#[tokio::test]
async fn test_commit_keeps_change_and_drops_backup() {
    let repo = common::setup_repo(&[("src/a.ts", SOURCE)]);
    let git = GitApplier::new(repo.path());

    let applied = apply_guarded(&git, repo.path(), area(), EDIT, 500)
        .await
        .unwrap();
    applied.commit().unwrap();

    let content = std::fs::read_to_string(repo.path().join("src/a.ts")).unwrap();
    assert!(content.contains("const a = 2;"));
    assert_eq!(common::backup_entries(repo.path()), 0);
}

#[tokio::test]
async fn test_revert_removes_created_file() {
    let repo = common::setup_repo(&[("src/a.ts", "ok\n")]);
    let diff = "--- /dev/null\n+++ b/src/new/c.ts\n@@ -0,0 +1,2 @@\n+one\n+two\n";
    let git = GitApplier::new(repo.path());

    let applied = apply_guarded(&git, repo.path(), area(), diff, 500)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(repo.path().join("src/new/c.ts")).unwrap(),
        "one\ntwo\n"
    );
    assert_eq!(applied.snapshot.backed_up_count(), 0);

    applied.revert().unwrap();
    assert!(!repo.path().join("src/new/c.ts").exists());
    assert!(!repo.path().join("src/new").exists());
    assert!(repo.path().join("src/a.ts").exists());
}

#[tokio::test]
async fn test_plain_paths_apply_at_strip_zero() {
    let repo = common::setup_repo(&[("src/a.ts", "ok\nBAD\n")]);
    let diff = "--- src/a.ts\n+++ src/a.ts\n@@ -1,2 +1,2 @@\n ok\n-BAD\n+ok\n";
    let git = GitApplier::new(repo.path());

    let applied = apply_guarded(&git, repo.path(), area(), diff, 500)
        .await
        .unwrap();
    assert_eq!(
        applied.fact.files.iter().collect::<Vec<_>>(),
        vec!["src/a.ts"]
    );
    applied.commit().unwrap();
    assert_eq!(
        std::fs::read_to_string(repo.path().join("src/a.ts")).unwrap(),
        "ok\nok\n"
    );
}

#[tokio::test]
async fn test_failed_check_touches_nothing() {
    let repo = common::setup_repo(&[("src/a.ts", SOURCE)]);
    let stale = "--- a/src/a.ts\n+++ b/src/a.ts\n@@ -1,2 +1,2 @@\n-something else\n+const a = 3;\n export default a;\n";
    let git = GitApplier::new(repo.path());

    let err = apply_guarded(&git, repo.path(), area(), stale, 500)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ApplyCheckFailed(_)), "{err:?}");
    assert_eq!(std::fs::read(repo.path().join("src/a.ts")).unwrap(), SOURCE.as_bytes());
    assert_eq!(common::backup_entries(repo.path()), 0);
}

/// Passes the dry run, then scribbles over the file and fails.
struct HalfApplier {
    root: std::path::PathBuf,
    calls: Mutex<Vec<&'static str>>,
}

impl PatchTool for HalfApplier {
    async fn ensure_available(&self) -> Result<()> {
        Ok(())
    }

    async fn check(&self, _diff: &str, _style: PrefixStyle) -> Result<()> {
        self.calls.lock().unwrap().push("check");
        Ok(())
    }

    async fn apply(&self, _diff: &str, style: PrefixStyle) -> Result<()> {
        self.calls.lock().unwrap().push("apply");
        assert_eq!(style, PrefixStyle::Prefixed);
        std::fs::write(self.root.join("src/a.ts"), "half written")?;
        Err(Error::ApplyFailed("disk full".to_string()))
    }
}

#[tokio::test]
async fn test_failed_apply_is_rolled_back() {
    let repo = common::setup_repo(&[("src/a.ts", SOURCE)]);
    let tool = HalfApplier {
        root: repo.path().to_path_buf(),
        calls: Mutex::new(Vec::new()),
    };

    let err = apply_guarded(&tool, repo.path(), area(), EDIT, 500)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ApplyFailed(_)), "{err:?}");
    assert_eq!(*tool.calls.lock().unwrap(), vec!["check", "apply"]);
    assert_eq!(std::fs::read(repo.path().join("src/a.ts")).unwrap(), SOURCE.as_bytes());
    assert_eq!(common::backup_entries(repo.path()), 0);
}
