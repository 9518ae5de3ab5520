//! # Metrics
//!
//! Prometheus metrics for monitoring the reconciler.
//!
//! ## Metrics Exposed
//!
//! - `infra_reconciler_reconciliations_total{kind,operation,outcome}` - Reconcile/destroy calls by result
//! - `infra_reconciler_reconciliation_duration_seconds` - Duration of reconcile/destroy calls
//! - `infra_reconciler_external_commands_total{program,outcome}` - External command runs
//! - `infra_reconciler_external_command_duration_seconds` - Duration of external command runs
//! - `infra_reconciler_certificates_rotated_total` - Leaf certificates re-issued
//! - `infra_reconciler_secret_entries_synced_total` - Secret entries written to the remote store
//!
//! The CLI is short-lived, so metrics are written once as text exposition
//! (see [`gather_text`]) for a node-exporter textfile collector.

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub(crate) static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "infra_reconciler_reconciliations_total",
            "Total number of reconcile and destroy calls by resource kind, operation and outcome",
        ),
        &["kind", "operation", "outcome"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "infra_reconciler_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 600.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static EXTERNAL_COMMANDS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "infra_reconciler_external_commands_total",
            "Total number of external command runs by program and outcome",
        ),
        &["program", "outcome"],
    )
    .expect("Failed to create EXTERNAL_COMMANDS_TOTAL metric - this should never happen")
});

static EXTERNAL_COMMAND_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "infra_reconciler_external_command_duration_seconds",
            "Duration of external command runs in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0]),
    )
    .expect("Failed to create EXTERNAL_COMMAND_DURATION metric - this should never happen")
});

static CERTIFICATES_ROTATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "infra_reconciler_certificates_rotated_total",
        "Total number of leaf certificates re-issued",
    )
    .expect("Failed to create CERTIFICATES_ROTATED_TOTAL metric - this should never happen")
});

static SECRET_ENTRIES_SYNCED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "infra_reconciler_secret_entries_synced_total",
        "Total number of secret entries written to the remote store",
    )
    .expect("Failed to create SECRET_ENTRIES_SYNCED_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(EXTERNAL_COMMANDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EXTERNAL_COMMAND_DURATION.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATES_ROTATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_ENTRIES_SYNCED_TOTAL.clone()))?;

    Ok(())
}

/// `operation` is `reconcile` or `destroy`
pub fn increment_reconciliations(kind: &str, operation: &str, outcome: &str) {
    RECONCILIATIONS_TOTAL
        .with_label_values(&[kind, operation, outcome])
        .inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_external_commands(program: &str, outcome: &str) {
    EXTERNAL_COMMANDS_TOTAL
        .with_label_values(&[program, outcome])
        .inc();
}

pub fn observe_external_command_duration(duration: f64) {
    EXTERNAL_COMMAND_DURATION.observe(duration);
}

pub fn increment_certificates_rotated() {
    CERTIFICATES_ROTATED_TOTAL.inc();
}

pub fn increment_secret_entries_synced(count: usize) {
    SECRET_ENTRIES_SYNCED_TOTAL.inc_by(count as u64);
}

/// Text exposition of every registered metric
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&REGISTRY.gather())?)
}
