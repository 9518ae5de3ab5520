//! # Plan Command
//!
//! Read-only preview of `apply`.

use crate::apply::selected_specs;
use crate::output::{print_reports, ResourceReport};
use anyhow::{Context, Result};
use infra_reconciler::runtime::InitializationResult;

/// Print the planned action for each selected resource
pub async fn plan_command(ctx: &InitializationResult, name: Option<&str>) -> Result<()> {
    let manifest = ctx.manifest.as_ref().context("plan needs a manifest")?;
    let specs = selected_specs(manifest, name, true)?;

    let mut reports = Vec::with_capacity(specs.len());
    let mut pending = 0;
    for spec in &specs {
        let result = ctx.reconciler.plan(spec).await;
        if result.as_ref().is_ok_and(|plan| !plan.is_noop()) {
            pending += 1;
        }
        reports.push(ResourceReport::new(&spec.key(), &result));
    }

    eprintln!("{pending} of {} resource(s) would change", specs.len());
    print_reports(&reports, "plan")
}
