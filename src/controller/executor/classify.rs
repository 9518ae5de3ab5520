//! # Outcome Classification
//!
//! Decides whether an external command logically succeeded. Exit codes are not
//! trusted on their own: some control-plane CLIs print a structured error to
//! stderr and still exit 0, so stderr is scanned for an error marker as well.
//! Whether those marker strings stay stable across CLI versions is outside our
//! control; both patterns are configurable.

use super::ExecutionResult;
use crate::constants::{DEFAULT_ERROR_MARKER, DEFAULT_NOT_FOUND_MARKER, MAX_DIAGNOSTIC_CHARS};
use regex::Regex;

/// Logical result of one external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// The command failed because the addressed object does not exist
    NotFound,
    /// The command failed; `message` is a bounded excerpt of the diagnostics
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
}

impl Outcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::NotFound => "not_found",
            Outcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    error_marker: Regex,
    not_found_marker: Regex,
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self {
            error_marker: Regex::new(DEFAULT_ERROR_MARKER)
                .expect("Failed to compile DEFAULT_ERROR_MARKER - this should never happen"),
            not_found_marker: Regex::new(DEFAULT_NOT_FOUND_MARKER)
                .expect("Failed to compile DEFAULT_NOT_FOUND_MARKER - this should never happen"),
        }
    }
}

impl OutcomeClassifier {
    /// Build a classifier from user-supplied patterns
    ///
    /// # Errors
    ///
    /// Returns the regex compile error for an invalid pattern.
    pub fn new(error_marker: &str, not_found_marker: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            error_marker: Regex::new(error_marker)?,
            not_found_marker: Regex::new(not_found_marker)?,
        })
    }

    /// Classify a finished run
    ///
    /// Failure if the exit code is non-zero or stderr carries the error marker,
    /// independently of each other. A failure whose diagnostics match the
    /// not-found marker is reported as `NotFound`.
    #[must_use]
    pub fn classify(&self, result: &ExecutionResult) -> Outcome {
        let exit_failed = result.exit_code != Some(0);
        let marker_line = self.error_line(&result.stderr);

        if !exit_failed && marker_line.is_none() {
            return Outcome::Succeeded;
        }

        if self.not_found_marker.is_match(&result.stderr)
            || (exit_failed && self.not_found_marker.is_match(&result.stdout))
        {
            return Outcome::NotFound;
        }

        let message = marker_line
            .or_else(|| last_non_empty_line(&result.stderr))
            .or_else(|| last_non_empty_line(&result.stdout))
            .unwrap_or("no diagnostic output");

        Outcome::Failed {
            exit_code: result.exit_code,
            message: bounded(message, MAX_DIAGNOSTIC_CHARS),
        }
    }

    /// First stderr line containing the error marker
    fn error_line<'a>(&self, stderr: &'a str) -> Option<&'a str> {
        stderr
            .lines()
            .map(str::trim)
            .find(|line| self.error_marker.is_match(line))
    }
}

/// Bounded last line of diagnostics, for failures that carry no message
#[must_use]
pub fn diagnostic(result: &ExecutionResult) -> String {
    let line = last_non_empty_line(&result.stderr)
        .or_else(|| last_non_empty_line(&result.stdout))
        .unwrap_or("no diagnostic output");
    bounded(line, MAX_DIAGNOSTIC_CHARS)
}

fn last_non_empty_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|line| !line.is_empty())
}

/// Truncate to `max_chars` on a char boundary
#[must_use]
pub fn bounded(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}
