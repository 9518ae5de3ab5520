//! # Reconciler Error Types
//!
//! One enum covering every failure a reconcile, destroy or plan call can
//! surface. Nothing is swallowed into a best-effort result: the caller sees
//! the first failure and decides whether to retry.
//!
//! | Variant                 | Reason label             | Transient |
//! |-------------------------|--------------------------|-----------|
//! | `Exec` (launch)         | `process_launch`         | no        |
//! | `Exec` (timeout / io)   | `process_timeout` / `process_io` | yes |
//! | `MalformedOutput`       | `malformed_output`       | yes       |
//! | `MalformedEntry`        | `malformed_entry`        | no        |
//! | `Certificate`           | per certificate error    | varies    |
//! | `ImmutableFieldChanged` | `immutable_field_changed`| no        |
//! | `ProvisioningTimeout`   | `provisioning_timeout`   | yes       |
//! | `Cancelled`             | `cancelled`              | no        |
//! | `ExternalCommandFailed` | `external_command_failed`| yes       |

use crate::controller::certificates::CertificateError;
use crate::controller::executor::ExecError;
use crate::controller::parser::MalformedOutputError;
use crate::controller::resource::{ResourceKey, ResourceStatus};
use crate::controller::secrets::{MalformedEntryError, SecretSyncError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// `ProcessLaunchError` / `ProcessTimeoutError`
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    MalformedOutput(#[from] MalformedOutputError),
    #[error(transparent)]
    MalformedEntry(#[from] MalformedEntryError),
    #[error(transparent)]
    SecretSync(#[from] SecretSyncError),
    /// `CAGenerationError`, `ConfigValidationError`, `InsecurePermissionsError`, ...
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error("{key}: field '{field}' cannot be changed in place (declared '{declared}', actual '{actual}'); destroy and re-create the resource")]
    ImmutableFieldChanged {
        key: ResourceKey,
        field: String,
        declared: String,
        actual: String,
    },
    /// The resource was left as is; it may still converge
    #[error("{key} did not settle within {}s (last status {last_status})", waited.as_secs())]
    ProvisioningTimeout {
        key: ResourceKey,
        waited: Duration,
        last_status: ResourceStatus,
    },
    #[error("{key}: {operation} cancelled")]
    Cancelled {
        key: ResourceKey,
        operation: &'static str,
    },
    /// The control plane rejected a describe/create/update/delete command
    #[error("{key}: {action} rejected by '{program}': {message}")]
    ExternalCommandFailed {
        key: ResourceKey,
        action: &'static str,
        program: String,
        exit_code: Option<i32>,
        message: String,
    },
    #[error("{key} does not exist")]
    NotFound { key: ResourceKey },
    #[error("invalid spec for {key}: {message}")]
    InvalidSpec { key: ResourceKey, message: String },
    #[error("invalid reconciler configuration: {0}")]
    Config(String),
}

impl ReconcilerError {
    /// Stable reason label for metrics and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerError::Exec(e) => e.as_str(),
            ReconcilerError::MalformedOutput(_) => "malformed_output",
            ReconcilerError::MalformedEntry(_) => "malformed_entry",
            ReconcilerError::SecretSync(e) => e.as_str(),
            ReconcilerError::Certificate(e) => e.as_str(),
            ReconcilerError::ImmutableFieldChanged { .. } => "immutable_field_changed",
            ReconcilerError::ProvisioningTimeout { .. } => "provisioning_timeout",
            ReconcilerError::Cancelled { .. } => "cancelled",
            ReconcilerError::ExternalCommandFailed { .. } => "external_command_failed",
            ReconcilerError::NotFound { .. } => "not_found",
            ReconcilerError::InvalidSpec { .. } => "invalid_spec",
            ReconcilerError::Config(_) => "config",
        }
    }

    /// Whether a later attempt with the same spec could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcilerError::Exec(e) => e.is_transient(),
            ReconcilerError::Certificate(e) => e.is_transient(),
            ReconcilerError::MalformedOutput(_)
            | ReconcilerError::ProvisioningTimeout { .. }
            | ReconcilerError::ExternalCommandFailed { .. } => true,
            ReconcilerError::MalformedEntry(_)
            | ReconcilerError::SecretSync(_)
            | ReconcilerError::ImmutableFieldChanged { .. }
            | ReconcilerError::Cancelled { .. }
            | ReconcilerError::NotFound { .. }
            | ReconcilerError::InvalidSpec { .. }
            | ReconcilerError::Config(_) => false,
        }
    }

    /// Operator-facing hint
    #[must_use]
    pub fn remediation(&self) -> String {
        match self {
            ReconcilerError::Exec(ExecError::Launch { program, .. }) => {
                format!("Install '{program}' or put it on PATH")
            }
            ReconcilerError::Exec(ExecError::Timeout { .. }) => {
                "Raise COMMAND_TIMEOUT_SECS or check control-plane latency".to_string()
            }
            ReconcilerError::Certificate(e) => e.remediation(),
            ReconcilerError::ImmutableFieldChanged { key, .. } => {
                format!("Run destroy for {key}, then apply again")
            }
            ReconcilerError::ProvisioningTimeout { key, .. } => format!(
                "{key} was not torn down; re-run apply to resume waiting, or raise PROVISIONING_MAX_WAIT_SECS"
            ),
            ReconcilerError::MalformedEntry(e) => {
                format!("Fix line {} of the local secret store", e.line)
            }
            other => other.to_string(),
        }
    }
}
