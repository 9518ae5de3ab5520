//! # Secret Synchronizer Error Types
//!
//! Error text carries line numbers and key names only, never values.

use crate::controller::parser::MalformedOutputError;
use thiserror::Error;

/// Why a local-store line could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedEntryReason {
    /// No `=` separator on the line
    MissingSeparator,
    /// Nothing before the `=`
    EmptyKey,
    /// Value contains a line break, which the line format cannot represent
    MultilineValue,
}

impl MalformedEntryReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MalformedEntryReason::MissingSeparator => "missing '=' separator",
            MalformedEntryReason::EmptyKey => "missing key before '='",
            MalformedEntryReason::MultilineValue => "value contains a line break",
        }
    }
}

/// `MalformedEntryError`: a local-store entry that cannot be parsed or written
///
/// `line` is 1-based: the input line for parsing, the entry position for
/// serialising.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed secret entry at line {line}: {}", reason.as_str())]
pub struct MalformedEntryError {
    pub line: usize,
    pub reason: MalformedEntryReason,
}

#[derive(Debug, Error)]
pub enum SecretSyncError {
    #[error(transparent)]
    MalformedEntry(#[from] MalformedEntryError),
    #[error(transparent)]
    MalformedOutput(#[from] MalformedOutputError),
    /// Payload encoding failed; the serde message is dropped since it may quote values
    #[error("failed to encode secret bundle '{bundle}' payload")]
    Encode { bundle: String },
}

impl SecretSyncError {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretSyncError::MalformedEntry(_) => "malformed_entry",
            SecretSyncError::MalformedOutput(_) => "malformed_output",
            SecretSyncError::Encode { .. } => "encode",
        }
    }
}
