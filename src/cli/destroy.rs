//! # Destroy Command
//!
//! Tears down declared resources, last declared first.

use crate::apply::selected_specs;
use crate::output::{print_reports, ResourceReport};
use anyhow::{Context, Result};
use infra_reconciler::runtime::InitializationResult;
use tracing::info;

/// Destroy the selected resources and print one report per resource
pub async fn destroy_command(ctx: &InitializationResult, name: Option<&str>) -> Result<()> {
    let manifest = ctx.manifest.as_ref().context("destroy needs a manifest")?;
    let specs = selected_specs(manifest, name, false)?;

    info!("🔄 Destroying {} resource(s)", specs.len());
    let results = ctx.reconciler.destroy_all(&specs, &ctx.cancel).await;

    let reports: Vec<_> = results
        .iter()
        .map(|(key, result)| ResourceReport::new(key, result))
        .collect();
    print_reports(&reports, "destroy")
}
