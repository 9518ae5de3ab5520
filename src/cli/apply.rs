//! # Apply Command
//!
//! Converges every selected resource of a manifest.

use crate::output::{print_reports, ResourceReport};
use anyhow::{bail, Context, Result};
use infra_reconciler::runtime::InitializationResult;
use infra_reconciler::{Manifest, ResourceSpec};
use tracing::info;

/// Specs for the declarations matching `name` (all when `None`)
pub fn selected_specs(
    manifest: &Manifest,
    name: Option<&str>,
    require_bundle: bool,
) -> Result<Vec<ResourceSpec>> {
    let decls = manifest.select(name);
    if decls.is_empty() {
        match name {
            Some(name) => bail!("No resource named '{name}' in the manifest"),
            None => bail!("The manifest declares no resources"),
        }
    }
    decls
        .into_iter()
        .map(|decl| manifest.spec_for(decl, require_bundle))
        .collect()
}

/// Reconcile the selected resources and print one report per resource
pub async fn apply_command(ctx: &InitializationResult, name: Option<&str>) -> Result<()> {
    let manifest = ctx.manifest.as_ref().context("apply needs a manifest")?;
    let specs = selected_specs(manifest, name, true)?;

    info!("🔄 Applying {} resource(s)", specs.len());
    let results = ctx.reconciler.reconcile_all(&specs, &ctx.cancel).await;

    let reports: Vec<_> = results
        .iter()
        .map(|(key, result)| ResourceReport::new(key, result))
        .collect();
    print_reports(&reports, "apply")
}
