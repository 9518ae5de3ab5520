//! # Cert Command
//!
//! Direct access to the certificate pipeline, outside any manifest.

use crate::output::print_json;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use infra_reconciler::controller::certificates::{
    check_rotation, CertificateChain, CertificatePhase, DeployTarget, LeafRequest, ReloadHook,
    RotationDecision,
};
use infra_reconciler::runtime::InitializationResult;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Subcommand)]
pub enum CertCommands {
    /// Create the root CA (reuses an existing one unless --force)
    #[command(name = "issue-ca")]
    IssueCa {
        /// Subject common name of the CA
        #[arg(long, default_value = "infra-reconciler root CA")]
        common_name: String,

        /// Validity in days (default: CA_VALIDITY_DAYS)
        #[arg(long)]
        validity_days: Option<u32>,

        /// Always mint a new CA, replacing the stored one
        #[arg(long)]
        force: bool,
    },
    /// Issue a leaf certificate signed by the stored CA
    Issue {
        /// Store name of the leaf
        #[arg(value_name = "NAME")]
        name: String,

        /// Subject common name (defaults to NAME)
        #[arg(long)]
        common_name: Option<String>,

        /// Subject alternative name, DNS or IP; repeatable or comma-separated
        #[arg(long = "san", value_delimiter = ',')]
        subject_alt_names: Vec<String>,

        /// Validity in days (default: LEAF_VALIDITY_DAYS)
        #[arg(long)]
        validity_days: Option<u32>,
    },
    /// Report whether a leaf is inside its renewal window
    Check {
        #[arg(value_name = "NAME")]
        name: String,

        /// Renewal window in days (default: RENEWAL_WINDOW_DAYS)
        #[arg(long)]
        window_days: Option<i64>,

        /// Exit non-zero when rotation is needed
        #[arg(long)]
        strict: bool,
    },
    /// Re-mint a leaf with a fresh key and the same subject
    Rotate {
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Install a leaf into a service directory, validate, then reload
    Deploy {
        #[arg(value_name = "NAME")]
        name: String,

        /// Target directory
        #[arg(long)]
        dir: PathBuf,

        /// Reload hook declared in the manifest; repeatable
        #[arg(long = "hook")]
        hooks: Vec<String>,

        /// Manifest declaring the reload hooks
        #[arg(short = 'f', long = "file", value_name = "MANIFEST")]
        manifest: Option<PathBuf>,
    },
}

impl CertCommands {
    pub fn manifest_path(&self) -> Option<&Path> {
        match self {
            CertCommands::Deploy { manifest, .. } => manifest.as_deref(),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RotationReport<'a> {
    name: &'a str,
    phase: CertificatePhase,
    not_after: DateTime<Utc>,
    window_days: i64,
    rotation_needed: bool,
}

pub async fn cert_command(ctx: &InitializationResult, command: CertCommands) -> Result<()> {
    let pipeline = ctx.reconciler.certificates();
    match command {
        CertCommands::IssueCa {
            common_name,
            validity_days,
            force,
        } => {
            let days = validity_days.unwrap_or(ctx.config.ca_validity_days);
            let ca = if force {
                pipeline.issue_ca(&common_name, days).await?
            } else {
                pipeline.ensure_ca(&common_name, days).await?
            };
            print_json(&ca)
        }
        CertCommands::Issue {
            name,
            common_name,
            subject_alt_names,
            validity_days,
        } => {
            let ca = pipeline.load_ca().await?.with_context(|| {
                format!(
                    "No CA in {}; run `infractl cert issue-ca` first",
                    pipeline.store_dir().display()
                )
            })?;
            let common_name = common_name.unwrap_or_else(|| name.clone());
            let mut sans: BTreeSet<String> = subject_alt_names
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if sans.is_empty() {
                sans.insert(common_name.clone());
            }
            let request = LeafRequest {
                name,
                common_name,
                subject_alt_names: sans,
                validity_days: validity_days.unwrap_or(ctx.config.leaf_validity_days),
            };
            let chain = pipeline.issue_leaf(&ca, &request).await?;
            print_json(&chain)
        }
        CertCommands::Check {
            name,
            window_days,
            strict,
        } => {
            let chain = load_chain(ctx, &name).await?;
            let window_days = window_days.unwrap_or(ctx.config.renewal_window_days);
            let needed = check_rotation(&chain, window_days, Utc::now())
                == RotationDecision::RotationNeeded;
            print_json(&RotationReport {
                name: &name,
                phase: chain.phase,
                not_after: chain.not_after,
                window_days,
                rotation_needed: needed,
            })?;
            if strict && needed {
                bail!("Certificate '{name}' needs rotation");
            }
            Ok(())
        }
        CertCommands::Rotate { name } => {
            let chain = load_chain(ctx, &name).await?;
            let rotated = pipeline.rotate(&chain).await?;
            info!("✅ Rotated certificate '{}'", name);
            print_json(&rotated)
        }
        CertCommands::Deploy {
            name,
            dir,
            hooks,
            manifest: _,
        } => {
            let chain = load_chain(ctx, &name).await?;
            let services = resolve_hooks(ctx, &hooks)?;
            let deployed = pipeline
                .deploy(&chain, &DeployTarget::new(dir), &services)
                .await?;
            print_json(&deployed)
        }
    }
}

async fn load_chain(ctx: &InitializationResult, name: &str) -> Result<CertificateChain> {
    ctx.reconciler
        .certificates()
        .load_chain(name)
        .await?
        .with_context(|| format!("No certificate named '{name}' in the store"))
}

fn resolve_hooks(ctx: &InitializationResult, names: &[String]) -> Result<Vec<ReloadHook>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let declared = ctx
        .manifest
        .as_ref()
        .map(|m| m.hooks.as_slice())
        .unwrap_or_default();
    names
        .iter()
        .map(|name| {
            declared
                .iter()
                .find(|hook| &hook.name == name)
                .cloned()
                .with_context(|| format!("Reload hook '{name}' is not declared (pass -f MANIFEST)"))
        })
        .collect()
}
