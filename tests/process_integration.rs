use std::path::PathBuf;
use std::time::Duration;

use fixloop::error::Error;
use fixloop::locate;
use fixloop::process::{ProcessConfig, spawn_and_stream};
use fixloop::task::{ShellTaskRunner, TaskRunner, TaskSpec};

fn shell(script: &str) -> ProcessConfig {
    ProcessConfig::shell(script, PathBuf::from("."), "test")
}

#[tokio::test]
#[cfg(unix)]
async fn test_shell_streams_both_pipes() {
    let output = spawn_and_stream(shell("echo out1; echo err1 >&2; echo out2"))
        .await
        .unwrap();
    assert!(output.success());
    assert_eq!(output.stdout_lines, vec!["out1", "out2"]);
    assert_eq!(output.stderr_lines, vec!["err1"]);
}

#[tokio::test]
#[cfg(unix)]
async fn test_failing_task_keeps_output() {
    let output = spawn_and_stream(shell("echo 'src/a.ts:3:1 error'; exit 2"))
        .await
        .unwrap();
    assert!(!output.success());
    assert_eq!(output.exit_code, 2);
    assert_eq!(output.signal, None);
    assert_eq!(output.stdout(), "src/a.ts:3:1 error");
}

#[tokio::test]
#[cfg(unix)]
async fn test_diagnostic_prefers_stderr() {
    let output = spawn_and_stream(shell("echo noise; echo 'patch failed: a.ts:1' >&2; exit 1"))
        .await
        .unwrap();
    assert_eq!(output.diagnostic(), "patch failed: a.ts:1");
}

#[tokio::test]
#[cfg(unix)]
async fn test_invalid_utf8_does_not_truncate_task_output() {
    let dir = tempfile::TempDir::new().unwrap();
    let spec = TaskSpec {
        name: None,
        command: r"printf 'src/a.ts:1:1 error\n\377 bad byte\nsrc/a.ts:2:1 error\nsrc/a.ts:3:1 error\n'; exit 1"
            .to_string(),
    };
    let result = ShellTaskRunner::new(spec, dir.path()).run().await.unwrap();
    assert_eq!(result.exit_code, 1);
    let refs = locate::locate_errors(&result.combined(), 100);
    assert_eq!(refs.len(), 3, "{:?}", result.stdout);
    assert!(result.stdout.contains("\u{fffd} bad byte"));
}

#[tokio::test]
#[cfg(unix)]
async fn test_large_stdin_does_not_deadlock() {
    // Bigger than a pipe buffer in both directions.
    let body: String = (0..20_000).map(|i| format!("+line {i}\n")).collect();
    let mut config = shell("cat");
    config.stdin_data = Some(body);
    config.timeout = Some(Duration::from_secs(20));
    let output = spawn_and_stream(config).await.unwrap();
    assert!(output.success());
    assert_eq!(output.stdout_lines.len(), 20_000);
    assert_eq!(output.stdout_lines[19_999], "+line 19999");
}

#[tokio::test]
#[cfg(unix)]
async fn test_timeout() {
    let mut config = shell("sleep 30");
    config.timeout = Some(Duration::from_millis(200));
    let err = spawn_and_stream(config).await.unwrap_err().to_string();
    assert!(err.contains("timed out"), "unexpected error: {err}");
}

#[tokio::test]
async fn test_spawn_failure() {
    let config = ProcessConfig {
        command: "nonexistent_binary_xyz_123".to_string(),
        args: vec![],
        working_dir: PathBuf::from("."),
        timeout: None,
        log_prefix: "test".to_string(),
        env: vec![],
        stdin_data: None,
    };
    let err = spawn_and_stream(config).await.unwrap_err().to_string();
    assert!(err.contains("failed to spawn"));
}

#[tokio::test]
#[cfg(unix)]
async fn test_env_vars() {
    let mut config = shell("echo $FIXLOOP_TEST_VAR");
    config.env = vec![("FIXLOOP_TEST_VAR".to_string(), "hello_world".to_string())];
    let output = spawn_and_stream(config).await.unwrap();
    assert_eq!(output.stdout_lines, vec!["hello_world"]);
}

#[tokio::test]
#[cfg(unix)]
async fn test_interrupted_task_is_not_a_failed_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let pid_file = dir.path().join("task.pid");
    let spec = TaskSpec {
        name: None,
        command: format!("echo $$ > {}; exec sleep 30", pid_file.display()),
    };
    let runner = ShellTaskRunner::new(spec, dir.path()).with_timeout(Some(Duration::from_secs(10)));
    let handle = tokio::spawn(async move { runner.run().await });

    let mut child_pid = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(content) = std::fs::read_to_string(&pid_file)
            && let Ok(p) = content.trim().parse::<i32>()
        {
            child_pid = Some(p);
            break;
        }
    }
    let child_pid = child_pid.expect("task should write its pid");

    // SAFETY: signals a child this test spawned.
    unsafe {
        libc::kill(child_pid, libc::SIGINT);
    }

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("should complete within 5s")
        .expect("task should not panic");
    assert!(matches!(result, Err(Error::Interrupted)));
}
