//! # Exponential Backoff
//!
//! Bounded exponential backoff for the readiness confirmation poll.
//! Each delay doubles the previous one until it reaches the cap, where it stays.
//!
//! ## Usage
//!
//! ```rust
//! use infra_reconciler::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(8));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates delays `initial, 2*initial, 4*initial, ...` capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay (for reset)
    initial: Duration,
    /// Delay returned by the next call
    current: Duration,
    /// Upper bound on any single delay
    max: Duration,
    /// Number of delays handed out since the last reset
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `initial` and capped at `max`
    ///
    /// A zero `initial` is bumped to one millisecond so the sequence grows.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            current: initial.min(max),
            max,
            attempts: 0,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.attempts += 1;
        result
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
        self.attempts = 0;
    }
}
