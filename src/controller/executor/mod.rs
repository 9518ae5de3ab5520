//! # Process Executor
//!
//! Runs external commands (cloud CLI, `openssl`, reload hooks) with a timeout,
//! captures bounded stdout/stderr and reports launch and timeout failures.
//!
//! The executor does not decide whether a command *logically* succeeded and
//! never retries; callers classify the [`ExecutionResult`] with
//! [`OutcomeClassifier`] and own any retry policy.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use infra_reconciler::controller::executor::{CommandExecutor, ExecOptions, ProcessExecutor};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = CommandExecutor::default();
//! let opts = ExecOptions::with_timeout(Duration::from_secs(30));
//! let result = executor
//!     .run("gcloud", &["compute".into(), "instances".into(), "list".into()], &opts)
//!     .await?;
//! println!("exit={:?} bytes={}", result.exit_code, result.stdout.len());
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod error;

pub use classify::{Outcome, OutcomeClassifier};
pub use error::{ExecError, LaunchFailureReason};

use crate::constants::{
    DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_MAX_OUTPUT_BYTES, OUTPUT_DRAIN_GRACE_MS,
};
use crate::observability::metrics;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::watch;
use tracing::{debug, info_span, warn, Instrument};
use zeroize::Zeroizing;

/// Captured output of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// At least one stream exceeded `max_output_bytes` and was cut
    pub truncated: bool,
}

impl ExecutionResult {
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

/// Per-invocation options
#[derive(Clone)]
pub struct ExecOptions {
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Piped to the child's stdin; keeps payloads out of argv and `ps` output
    pub stdin: Option<Zeroizing<Vec<u8>>>,
    pub max_output_bytes: usize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            working_dir: None,
            env: BTreeMap::new(),
            stdin: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl ExecOptions {
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(Zeroizing::new(input));
        self
    }

    #[must_use]
    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }
}

impl std::fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecOptions")
            .field("timeout", &self.timeout)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("stdin", &self.stdin.as_ref().map(|s| s.len()))
            .field("max_output_bytes", &self.max_output_bytes)
            .finish()
    }
}

/// Process boundary used by every component that talks to an external tool
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run `command` with `args` and capture its output
    ///
    /// A non-zero exit code is returned as a normal [`ExecutionResult`].
    async fn run(
        &self,
        command: &str,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<ExecutionResult, ExecError>;
}

/// [`ProcessExecutor`] backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

#[async_trait]
impl ProcessExecutor for CommandExecutor {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<ExecutionResult, ExecError> {
        let span = info_span!(
            "exec",
            command = command,
            args = args.len(),
            timeout_secs = opts.timeout.as_secs()
        );
        let start = Instant::now();
        let result = run_process(command, args, opts).instrument(span).await;

        let outcome = match &result {
            Ok(r) if r.exit_code == Some(0) => "exit_zero",
            Ok(_) => "exit_nonzero",
            Err(e) => e.as_str(),
        };
        metrics::increment_external_commands(program_label(command), outcome);
        metrics::observe_external_command_duration(start.elapsed().as_secs_f64());

        result
    }
}

/// Metrics label for a program: the file name, never the full path
fn program_label(command: &str) -> &str {
    Path::new(command)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(command)
}

fn resolve_program(command: &str) -> Result<PathBuf, ExecError> {
    if command.contains(std::path::MAIN_SEPARATOR) {
        return Ok(PathBuf::from(command));
    }
    which::which(command).map_err(|e| ExecError::Launch {
        program: command.to_string(),
        reason: LaunchFailureReason::NotFound,
        message: format!("{command} not found in PATH: {e}"),
    })
}

async fn run_process(
    command: &str,
    args: &[String],
    opts: &ExecOptions,
) -> Result<ExecutionResult, ExecError> {
    let program = resolve_program(command)?;
    debug!("Running {} with {} argument(s)", program.display(), args.len());

    let mut cmd = tokio::process::Command::new(&program);
    cmd.args(args)
        .stdin(if opts.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref dir) = opts.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| ExecError::Launch {
        program: command.to_string(),
        reason: e.kind().into(),
        message: e.to_string(),
    })?;

    // Readers start before stdin is written so a chatty child cannot deadlock us
    let limit = opts.max_output_bytes;
    let (stop_readers, stop) = watch::channel(false);
    let stdout_task = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(read_bounded(pipe, limit, stop.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(read_bounded(pipe, limit, stop)));

    // Written concurrently so a child that never reads its input still times out
    let stdin_task = match (opts.stdin.as_ref(), child.stdin.take()) {
        (Some(input), Some(stdin)) => Some(tokio::spawn(write_stdin(
            stdin,
            input.clone(),
            command.to_string(),
        ))),
        _ => None,
    };

    let status = match tokio::time::timeout(opts.timeout, child.wait()).await {
        Ok(status) => Some(status.map_err(|source| ExecError::Io {
            program: command.to_string(),
            source,
        })?),
        Err(_) => {
            warn!(
                "{} exceeded {}s timeout, killing",
                command,
                opts.timeout.as_secs()
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to kill timed out process {}: {}", command, e);
            }
            None
        }
    };
    if let Some(task) = stdin_task {
        task.abort();
    }

    let mut readers = Box::pin(async {
        tokio::join!(join_reader(stdout_task), join_reader(stderr_task))
    });
    let grace = Duration::from_millis(OUTPUT_DRAIN_GRACE_MS);
    let ((stdout, stdout_truncated), (stderr, stderr_truncated)) =
        match tokio::time::timeout(grace, &mut readers).await {
            Ok(output) => output,
            Err(_) => {
                warn!(
                    "Output of {} is still held open by another process, keeping what was read",
                    command
                );
                stop_readers.send_replace(true);
                readers.await
            }
        };
    let result = ExecutionResult {
        exit_code: status.and_then(|s| s.code()),
        stdout,
        stderr,
        truncated: stdout_truncated || stderr_truncated,
    };

    match status {
        Some(_) => Ok(result),
        None => Err(ExecError::Timeout {
            program: command.to_string(),
            after: opts.timeout,
            partial: Box::new(result),
        }),
    }
}

/// Feed `input` to the child and close its stdin
///
/// A child that exits without reading everything is not an error here: its
/// exit code and stderr say what went wrong.
async fn write_stdin(mut stdin: ChildStdin, input: Zeroizing<Vec<u8>>, program: String) {
    let written = match stdin.write_all(&input).await {
        Ok(()) => stdin.shutdown().await,
        Err(e) => Err(e),
    };
    match written {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            debug!("{} closed stdin before reading all input", program);
        }
        Err(e) => warn!("Failed to write stdin of {}: {}", program, e),
    }
}

async fn join_reader(task: Option<tokio::task::JoinHandle<(Vec<u8>, bool)>>) -> (String, bool) {
    match task {
        Some(handle) => match handle.await {
            Ok((bytes, truncated)) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
            Err(e) => {
                warn!("Output reader task failed: {}", e);
                (String::new(), false)
            }
        },
        None => (String::new(), false),
    }
}

/// Read a pipe to EOF or until `stop`, keeping at most `limit` bytes
///
/// Bytes past the limit are drained and dropped so the child never blocks on
/// a full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(
    mut pipe: R,
    limit: usize,
    mut stop: watch::Receiver<bool>,
) -> (Vec<u8>, bool) {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = tokio::select! {
            biased;
            read = pipe.read(&mut chunk) => read,
            _ = stop.changed() => break,
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Pipe read ended with error: {}", e);
                break;
            }
        }
    }
    (kept, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_label_strips_directories() {
        assert_eq!(program_label("/usr/bin/openssl"), "openssl");
        assert_eq!(program_label("gcloud"), "gcloud");
    }

    #[test]
    fn test_exec_options_debug_hides_stdin_and_env_values() {
        let opts = ExecOptions::default()
            .env("API_TOKEN", "t0ps3cret")
            .stdin(b"[{\"key\":\"A\",\"value\":\"hunter2\"}]".to_vec());
        let rendered = format!("{opts:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("t0ps3cret"));
        assert!(rendered.contains("API_TOKEN"));
    }

    #[tokio::test]
    async fn test_read_bounded_truncates_and_drains() {
        let (_stop_tx, stop) = watch::channel(false);
        let data = vec![b'x'; 20_000];
        let (kept, truncated) = read_bounded(&data[..], 100, stop.clone()).await;
        assert_eq!(kept.len(), 100);
        assert!(truncated);

        let (kept, truncated) = read_bounded(&b"short"[..], 100, stop).await;
        assert_eq!(kept, b"short");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_read_bounded_stops_on_request() {
        let (stop_tx, stop) = watch::channel(false);
        let (mut writer, reader) = tokio::io::duplex(64);
        writer.write_all(b"partial").await.expect("write");

        let task = tokio::spawn(read_bounded(reader, 100, stop));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send_replace(true);
        let (kept, truncated) = task.await.expect("reader");
        assert_eq!(kept, b"partial");
        assert!(!truncated);
        drop(writer);
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let executor = CommandExecutor;
        let err = executor
            .run(
                "definitely-not-a-real-binary-4242",
                &[],
                &ExecOptions::default(),
            )
            .await
            .expect_err("missing binary must fail to launch");
        match err {
            ExecError::Launch { reason, .. } => assert_eq!(reason, LaunchFailureReason::NotFound),
            other => panic!("expected launch error, got {other:?}"),
        }
    }
}
