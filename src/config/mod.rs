//! # Configuration
//!
//! Reconciler settings loaded from environment variables, and the YAML
//! manifest that declares resources.
//!
//! The configuration is built once at startup and passed by value into the
//! [`Reconciler`](crate::controller::reconciler::Reconciler); nothing reads the
//! environment after that.

pub mod manifest;

pub use manifest::{Manifest, ResourceDecl};

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Reconciler-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Timeout for a single external command (seconds)
    pub command_timeout_secs: u64,
    /// Per-stream cap on captured command output (bytes)
    pub max_output_bytes: usize,
    /// First delay of the readiness poll (milliseconds)
    pub poll_initial_ms: u64,
    /// Cap on the readiness poll delay (milliseconds)
    pub poll_max_ms: u64,
    /// How long a created/updated/deleted resource may take to settle (seconds)
    pub provisioning_max_wait_secs: u64,
    /// Maximum concurrent reconciliations
    /// Limits how many resources are reconciled simultaneously
    pub max_concurrent_reconciliations: usize,
    /// Days before `notAfter` at which a leaf is rotated
    pub renewal_window_days: i64,
    /// Validity of a newly issued CA (days)
    pub ca_validity_days: u32,
    /// Default validity of a newly issued leaf (days)
    pub leaf_validity_days: u32,
    /// Regex marking a logical failure in stderr
    pub error_marker: String,
    /// Regex marking a "does not exist" failure
    pub not_found_marker: String,
    /// Directory holding CA and leaf material
    pub cert_store_dir: PathBuf,
    /// PKI toolkit binary
    pub openssl_bin: String,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Enable color in text format logs
    pub log_enable_color: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            poll_initial_ms: DEFAULT_POLL_INITIAL_MS,
            poll_max_ms: DEFAULT_POLL_MAX_MS,
            provisioning_max_wait_secs: DEFAULT_PROVISIONING_MAX_WAIT_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            renewal_window_days: DEFAULT_RENEWAL_WINDOW_DAYS,
            ca_validity_days: DEFAULT_CA_VALIDITY_DAYS,
            leaf_validity_days: DEFAULT_LEAF_VALIDITY_DAYS,
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
            not_found_marker: DEFAULT_NOT_FOUND_MARKER.to_string(),
            cert_store_dir: PathBuf::from(DEFAULT_CERT_STORE_DIR),
            openssl_bin: DEFAULT_OPENSSL_BIN.to_string(),
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
            log_enable_color: false,
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            command_timeout_secs: env_var_or_default(
                "COMMAND_TIMEOUT_SECS",
                DEFAULT_COMMAND_TIMEOUT_SECS,
            ),
            max_output_bytes: env_var_or_default("MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES),
            poll_initial_ms: env_var_or_default("POLL_INITIAL_MS", DEFAULT_POLL_INITIAL_MS),
            poll_max_ms: env_var_or_default("POLL_MAX_MS", DEFAULT_POLL_MAX_MS),
            provisioning_max_wait_secs: env_var_or_default(
                "PROVISIONING_MAX_WAIT_SECS",
                DEFAULT_PROVISIONING_MAX_WAIT_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            renewal_window_days: env_var_or_default(
                "RENEWAL_WINDOW_DAYS",
                DEFAULT_RENEWAL_WINDOW_DAYS,
            ),
            ca_validity_days: env_var_or_default("CA_VALIDITY_DAYS", DEFAULT_CA_VALIDITY_DAYS),
            leaf_validity_days: env_var_or_default(
                "LEAF_VALIDITY_DAYS",
                DEFAULT_LEAF_VALIDITY_DAYS,
            ),
            error_marker: env_var_or_default_str("ERROR_MARKER", DEFAULT_ERROR_MARKER),
            not_found_marker: env_var_or_default_str("NOT_FOUND_MARKER", DEFAULT_NOT_FOUND_MARKER),
            cert_store_dir: PathBuf::from(env_var_or_default_str(
                "CERT_STORE_DIR",
                DEFAULT_CERT_STORE_DIR,
            )),
            openssl_bin: env_var_or_default_str("OPENSSL_BIN", DEFAULT_OPENSSL_BIN),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
            log_enable_color: env_var_or_default_bool("LOG_ENABLE_COLOR", false),
        }
    }

    /// Get external command timeout duration
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Get readiness poll starting delay
    #[must_use]
    pub fn poll_initial(&self) -> Duration {
        Duration::from_millis(self.poll_initial_ms)
    }

    /// Get readiness poll maximum delay
    #[must_use]
    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.poll_max_ms)
    }

    /// Get maximum provisioning wait duration
    #[must_use]
    pub fn provisioning_max_wait(&self) -> Duration {
        Duration::from_secs(self.provisioning_max_wait_secs)
    }
}

/// Read environment variable or return default value
///
/// A value that does not parse is logged and replaced by the default.
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    parse_or_default(key, std::env::var(key).ok().as_deref(), default)
}

fn parse_or_default<T: std::str::FromStr>(key: &str, raw: Option<&str>, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring {}={:?} ({}), using the default", key, raw, e);
            default
        }
    }
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    parse_bool_or_default(key, std::env::var(key).ok().as_deref(), default)
}

fn parse_bool_or_default(key: &str, raw: Option<&str>, default: bool) -> bool {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            warn!("Ignoring {}={:?} (not a boolean), using {}", key, raw, default);
            default
        }
    }
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
