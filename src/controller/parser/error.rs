//! # Parser Error Types

use thiserror::Error;

/// Output that could not be decoded into the expected record
///
/// `snippet` is a bounded excerpt of the offending text, or a redaction marker
/// when the text may contain secret values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed {expected} output: {detail} (near: {snippet})")]
pub struct MalformedOutputError {
    pub expected: &'static str,
    pub detail: String,
    pub snippet: String,
}

impl MalformedOutputError {
    #[must_use]
    pub fn new(expected: &'static str, detail: impl Into<String>, snippet: String) -> Self {
        Self {
            expected,
            detail: detail.into(),
            snippet,
        }
    }
}
