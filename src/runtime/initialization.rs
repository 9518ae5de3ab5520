//! # Initialization
//!
//! Process start-up shared by every `infractl` subcommand: tracing, metrics
//! registration, manifest loading, reconciler construction and Ctrl-C
//! handling.

use crate::config::{Manifest, ReconcilerConfig};
use crate::controller::executor::{CommandExecutor, ProcessExecutor};
use crate::controller::reconciler::{cancellation, CancellationSignal, Reconciler};
use crate::observability;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Everything a subcommand needs to run
pub struct InitializationResult {
    /// Immutable configuration read from the environment
    pub config: ReconcilerConfig,
    /// Declared resources, when a manifest was given
    pub manifest: Option<Manifest>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Fires on Ctrl-C
    pub cancel: CancellationSignal,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("resources", &self.manifest.as_ref().map(|m| m.resources.len()))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` applies to this crate.
/// Output goes to stderr so stdout stays machine-parseable.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: &ReconcilerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "infra_reconciler={}",
            config.log_level.to_lowercase()
        ))
    });

    let result = if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(config.log_enable_color)
            .try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))
}

/// Build a reconciler from `config`, applying the manifest's command
/// overrides and reload hooks
///
/// # Errors
///
/// Returns an error for invalid markers, a zero concurrency limit, or a
/// command override for a kind that takes none.
pub fn build_reconciler(
    executor: Arc<dyn ProcessExecutor>,
    config: ReconcilerConfig,
    manifest: Option<&Manifest>,
) -> Result<Reconciler> {
    let mut reconciler =
        Reconciler::new(executor, config).context("Failed to create reconciler")?;
    if let Some(manifest) = manifest {
        for (kind, commands) in &manifest.kinds {
            reconciler = reconciler
                .with_commands(*kind, commands.clone())
                .with_context(|| format!("Invalid command override for {kind}"))?;
        }
        for hook in &manifest.hooks {
            reconciler = reconciler.with_reload_hook(hook.clone());
        }
    }
    Ok(reconciler)
}

/// Initialize the runtime
///
/// This function handles:
/// - Configuration from environment variables
/// - Tracing subscriber setup
/// - Metrics registration
/// - Manifest loading (when `manifest_path` is given)
/// - Reconciler setup
/// - Ctrl-C → cancellation
///
/// # Errors
///
/// Returns an error if any of the steps above fails.
pub async fn initialize(manifest_path: Option<&Path>) -> Result<InitializationResult> {
    let config = ReconcilerConfig::from_env();
    init_tracing(&config)?;

    info!("Starting infractl v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let manifest = match manifest_path {
        Some(path) => Some(Manifest::load(path)?),
        None => None,
    };

    let executor: Arc<dyn ProcessExecutor> = Arc::new(CommandExecutor);
    let reconciler = Arc::new(build_reconciler(executor, config.clone(), manifest.as_ref())?);

    let (handle, cancel) = cancellation();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling in-flight operations");
                handle.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    Ok(InitializationResult {
        config,
        manifest,
        reconciler,
        cancel,
    })
}
