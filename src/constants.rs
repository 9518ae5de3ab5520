//! # Constants
//!
//! Shared constants used throughout the reconciler.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default timeout for a single external command (seconds)
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Default per-stream cap on captured command output (bytes)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// How long output pipes may stay open after the child exited or was killed
/// (a background grandchild can inherit them)
pub const OUTPUT_DRAIN_GRACE_MS: u64 = 500;

/// Default first delay of the readiness confirmation poll (milliseconds)
pub const DEFAULT_POLL_INITIAL_MS: u64 = 1000;

/// Default cap on the readiness confirmation poll delay (milliseconds)
pub const DEFAULT_POLL_MAX_MS: u64 = 30_000;

/// Default maximum time to wait for a created resource to report ready (seconds)
/// Instance provisioning routinely takes a few minutes
pub const DEFAULT_PROVISIONING_MAX_WAIT_SECS: u64 = 600;

/// Default number of reconciliations allowed in flight at once
/// Control planes rate-limit aggressively; keep this low
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 4;

/// Default certificate renewal window (days before `notAfter`)
pub const DEFAULT_RENEWAL_WINDOW_DAYS: i64 = 30;

/// Default validity for a CA certificate (days)
pub const DEFAULT_CA_VALIDITY_DAYS: u32 = 3650;

/// Default validity for a leaf certificate (days)
pub const DEFAULT_LEAF_VALIDITY_DAYS: u32 = 365;

/// Default regex marking a logical failure in a command's stderr
pub const DEFAULT_ERROR_MARKER: &str = r"(?i)\berror\b";

/// Default regex marking a "resource does not exist" failure
pub const DEFAULT_NOT_FOUND_MARKER: &str = r"(?i)(not[ _]found|does not exist|no such)";

/// Maximum characters of raw output quoted in a `MalformedOutputError`
pub const MAX_SNIPPET_CHARS: usize = 120;

/// Maximum parse attempts when looking for a JSON document in CLI output
pub const MAX_JSON_CANDIDATES: usize = 64;

/// Maximum characters of diagnostics quoted in a failed-command error
pub const MAX_DIAGNOSTIC_CHARS: usize = 300;

/// Default directory holding CA and leaf certificate material
pub const DEFAULT_CERT_STORE_DIR: &str = "/var/lib/infra-reconciler/pki";

/// Default PKI toolkit binary
pub const DEFAULT_OPENSSL_BIN: &str = "openssl";

/// Default RSA key size for leaf keys
pub const DEFAULT_LEAF_KEY_BITS: u32 = 2048;

/// Default RSA key size for CA keys
pub const DEFAULT_CA_KEY_BITS: u32 = 4096;

/// Owner-only read/write for private key files
pub const PRIVATE_KEY_MODE: u32 = 0o600;

/// World-readable mode for certificate files
pub const CERTIFICATE_MODE: u32 = 0o644;
