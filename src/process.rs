use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Configuration for spawning a child process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub log_prefix: String,
    pub env: Vec<(String, String)>,
    pub stdin_data: Option<String>,
}

impl ProcessConfig {
    /// Run `script` through the platform shell (`sh -c` or `cmd /C`).
    pub fn shell(script: &str, working_dir: PathBuf, log_prefix: &str) -> Self {
        let (command, flag) = if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };
        Self {
            command: command.to_string(),
            args: vec![flag.to_string(), script.to_string()],
            working_dir,
            timeout: None,
            log_prefix: log_prefix.to_string(),
            env: vec![],
            stdin_data: None,
        }
    }
}

/// Next `\n`-terminated line with invalid UTF-8 replaced, `None` at EOF.
///
/// A read error ends the stream as well; the pipe is closed either way.
async fn next_lossy_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<String> {
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf).await {
        Ok(0) => None,
        Ok(_) => {
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
        Err(e) => {
            warn!(error = %e, "failed to read child output");
            None
        }
    }
}

/// Output from a completed child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }

    pub fn stdout(&self) -> String {
        self.stdout_lines.join("\n")
    }

    pub fn stderr(&self) -> String {
        self.stderr_lines.join("\n")
    }

    /// Stderr if present, otherwise stdout. Used for tool diagnostics.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr();
        if stderr.trim().is_empty() {
            self.stdout()
        } else {
            stderr
        }
    }
}

/// Spawn a child process, optionally feed it stdin, stream its output
/// line-by-line, and wait for it.
///
/// The child is placed in its own process group on Unix. SIGINT and SIGTERM
/// received by the parent are forwarded to the child's process group.
pub async fn spawn_and_stream(config: ProcessConfig) -> Result<ProcessOutput> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .current_dir(&config.working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if config.stdin_data.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Process(format!("failed to spawn '{}': {e}", config.command)))?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Process("child has no pid".into()))?;
    debug!(pid, command = %config.command, "spawned child process");

    let stdin_task = match config.stdin_data {
        Some(data) => {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| Error::Process("child stdin not piped".into()))?;
            // Written concurrently with the readers so a chatty child cannot
            // block on a full stdout pipe. Dropping `stdin` closes it (EOF).
            Some(tokio::spawn(async move {
                if let Err(e) = stdin.write_all(data.as_bytes()).await {
                    warn!(error = %e, "failed to write child stdin");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Process("child stdout not piped".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Process("child stderr not piped".into()))?;

    let prefix_out = config.log_prefix.clone();
    let prefix_err = config.log_prefix;

    let stdout_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stdout);
        while let Some(line) = next_lossy_line(&mut reader).await {
            info!("[{prefix_out}] {line}");
            lines.push(line);
        }
        lines
    });

    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stderr);
        while let Some(line) = next_lossy_line(&mut reader).await {
            warn!("[{prefix_err}] {line}");
            lines.push(line);
        }
        lines
    });

    #[cfg(unix)]
    let signal_task = {
        let pgid = pid as i32;
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let (Ok(mut sigint), Ok(mut sigterm)) = (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) else {
                return;
            };
            loop {
                tokio::select! {
                    _ = sigint.recv() => {
                        unsafe { libc::killpg(pgid, libc::SIGINT); }
                    }
                    _ = sigterm.recv() => {
                        unsafe { libc::killpg(pgid, libc::SIGTERM); }
                    }
                }
            }
        })
    };

    let status = if let Some(dur) = config.timeout {
        match tokio::time::timeout(dur, child.wait()).await {
            Ok(r) => r.map_err(|e| Error::Process(format!("wait error: {e}")))?,
            Err(_) => {
                #[cfg(unix)]
                signal_task.abort();
                #[cfg(unix)]
                unsafe {
                    libc::killpg(pid as i32, libc::SIGTERM);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
                #[cfg(unix)]
                unsafe {
                    libc::killpg(pid as i32, libc::SIGKILL);
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Process(format!("process timed out after {dur:?}")));
            }
        }
    } else {
        child
            .wait()
            .await
            .map_err(|e| Error::Process(format!("wait error: {e}")))?
    };

    #[cfg(unix)]
    signal_task.abort();

    if let Some(task) = stdin_task {
        let _ = task.await;
    }

    let stdout_lines = stdout_task
        .await
        .map_err(|e| Error::Process(format!("stdout reader failed: {e}")))?;
    let stderr_lines = stderr_task
        .await
        .map_err(|e| Error::Process(format!("stderr reader failed: {e}")))?;

    let (exit_code, signal) = extract_exit_info(&status);

    Ok(ProcessOutput {
        exit_code,
        signal,
        stdout_lines,
        stderr_lines,
    })
}

fn extract_exit_info(status: &std::process::ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return (128 + sig, Some(sig));
        }
    }
    (-1, None)
}
