//! Child processes with a wall-clock limit and bounded captured output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes dropped from stdout beyond the capture limit.
    pub stdout_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.stdout).context("stdout is not utf-8")
    }

    /// Last `max_bytes` of stderr, for error messages.
    pub fn stderr_tail(&self, max_bytes: usize) -> String {
        let start = self.stderr.len().saturating_sub(max_bytes);
        String::from_utf8_lossy(&self.stderr[start..]).trim().to_string()
    }
}

/// Run `cmd`, feeding `stdin`, and kill it once `timeout` elapses.
///
/// Stdin is written and both output pipes are drained on helper threads so a
/// chatty child can never deadlock against us. At most `output_limit_bytes`
/// of each stream are kept; the rest is drained and counted.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "spawned child process");

    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => Some(thread::spawn(move || {
            // A child that exits without reading stdin closes the pipe; that
            // is reported through its exit status, not here.
            let _ = pipe.write_all(&input);
        })),
        (Some(_), None) => return Err(anyhow!("stdin was not piped")),
        _ => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    if let Some(handle) = writer {
        handle
            .join()
            .map_err(|_| anyhow!("stdin writer thread panicked"))?;
    }
    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, _) = join_reader(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 {
        warn!(stdout_truncated, "stdout truncated");
    }
    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
    Ok((buf, dropped))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn echoes_stdin_to_stdout() {
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"hello".to_vec()),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout_text().expect("utf8"), "hello");
        assert!(!output.timed_out);
    }

    #[test]
    fn kills_command_after_timeout() {
        let output = run_command_with_timeout(
            sh("sleep 5"),
            None,
            Duration::from_millis(100),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }

    #[test]
    fn truncates_stdout_beyond_limit() {
        let output = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(5),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn captures_stderr_tail() {
        let output = run_command_with_timeout(
            sh("echo boom >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr_tail(64), "boom");
    }
}
