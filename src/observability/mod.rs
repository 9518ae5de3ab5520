//! # Observability
//!
//! - `metrics`: Prometheus counters and histograms, exported as text

pub mod metrics;

// Re-export for convenience
pub use metrics::*;
