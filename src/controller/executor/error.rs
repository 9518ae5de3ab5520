//! # Executor Error Types
//!
//! Launch and timeout failures. A non-zero exit code is not an error at this
//! layer; see [`super::classify`].

use super::ExecutionResult;
use std::time::Duration;
use thiserror::Error;

/// Why an executable could not be started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailureReason {
    /// Not found on `PATH` or at the given location
    NotFound,
    /// Found but not executable by this user
    PermissionDenied,
    /// Any other spawn failure (fd exhaustion, bad working dir, ...)
    SpawnFailed,
}

impl LaunchFailureReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchFailureReason::NotFound => "not_found",
            LaunchFailureReason::PermissionDenied => "permission_denied",
            LaunchFailureReason::SpawnFailed => "spawn_failed",
        }
    }
}

impl From<std::io::ErrorKind> for LaunchFailureReason {
    fn from(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => LaunchFailureReason::NotFound,
            std::io::ErrorKind::PermissionDenied => LaunchFailureReason::PermissionDenied,
            _ => LaunchFailureReason::SpawnFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    /// `ProcessLaunchError`
    #[error("failed to launch '{program}' ({}): {message}", reason.as_str())]
    Launch {
        program: String,
        reason: LaunchFailureReason,
        message: String,
    },
    /// `ProcessTimeoutError`: the child was killed; `partial` holds what it wrote
    #[error("'{program}' timed out after {}s and was killed", after.as_secs())]
    Timeout {
        program: String,
        after: Duration,
        partial: Box<ExecutionResult>,
    },
    /// Pipe I/O failure while the child was running
    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// Stable reason label for metrics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecError::Launch { .. } => "process_launch",
            ExecError::Timeout { .. } => "process_timeout",
            ExecError::Io { .. } => "process_io",
        }
    }

    /// Timeouts and pipe errors may clear up on a later attempt; a missing
    /// binary will not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, ExecError::Launch { .. })
    }
}
