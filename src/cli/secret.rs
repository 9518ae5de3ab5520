//! # Secret Command
//!
//! Moves secret bundles between a local `KEY=VALUE` file and the remote
//! store. Values are never printed; reports carry entry counts and digests.

use crate::output::print_json;
use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use infra_reconciler::controller::secrets::{from_local_store, sync, to_local_store};
use infra_reconciler::runtime::InitializationResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

#[derive(Subcommand)]
pub enum SecretCommands {
    /// Converge the remote bundle to a local store file
    Push {
        /// Remote bundle name
        #[arg(value_name = "NAME")]
        name: String,

        /// Local KEY=VALUE file
        #[arg(long)]
        file: PathBuf,

        /// Scope parameter such as project=acme; repeatable
        #[arg(long = "scope", value_parser = parse_scope)]
        scope: Vec<(String, String)>,
    },
    /// Write the remote bundle to a local store file (mode 0600)
    Pull {
        /// Remote bundle name
        #[arg(value_name = "NAME")]
        name: String,

        /// Destination file; replaced if it exists
        #[arg(long)]
        out: PathBuf,

        /// Scope parameter such as project=acme; repeatable
        #[arg(long = "scope", value_parser = parse_scope)]
        scope: Vec<(String, String)>,
    },
}

fn parse_scope(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleReport<'a> {
    name: &'a str,
    entries: usize,
    digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

pub async fn secret_command(ctx: &InitializationResult, command: SecretCommands) -> Result<()> {
    match command {
        SecretCommands::Push { name, file, scope } => {
            let scope: BTreeMap<_, _> = scope.into_iter().collect();
            let content = Zeroizing::new(
                std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?,
            );
            let bundle = from_local_store(&name, content.lines())
                .with_context(|| format!("Invalid local store: {}", file.display()))?;
            let entries = bundle.len();
            let digest = bundle.digest();

            let state = sync::push(&ctx.reconciler, &name, &scope, bundle, &ctx.cancel)
                .await
                .map_err(|e| anyhow!("{}: {}", e.as_str(), e))?;
            print_json(&BundleReport {
                name: &name,
                entries,
                digest,
                status: Some(state.status.to_string()),
            })
        }
        SecretCommands::Pull { name, out, scope } => {
            let scope: BTreeMap<_, _> = scope.into_iter().collect();
            let bundle = sync::pull(&ctx.reconciler, &name, &scope)
                .await
                .map_err(|e| anyhow!("{}: {}", e.as_str(), e))?;
            let rendered = Zeroizing::new(
                to_local_store(&bundle).context("Remote bundle cannot be written as KEY=VALUE lines")?,
            );
            write_owner_only(&out, rendered.as_bytes())?;
            info!(
                "✅ Pulled {} entr(ies) of '{}' into {}",
                bundle.len(),
                name,
                out.display()
            );
            print_json(&BundleReport {
                name: &name,
                entries: bundle.len(),
                digest: bundle.digest(),
                status: None,
            })
        }
    }
}

/// Write `content` to `path` through a `0600` temp file in the same directory
fn write_owner_only(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(
        ".{}.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bundle".to_string()),
        std::process::id()
    ));
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&tmp)
        .with_context(|| format!("Failed to create {}", tmp.display()))?;
    let written = file.write_all(content).and_then(|()| file.sync_all());
    if let Err(e) = written {
        discard_temp(&tmp);
        return Err(e).with_context(|| format!("Failed to write {}", tmp.display()));
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        discard_temp(&tmp);
        return Err(e).with_context(|| format!("Failed to write {}", path.display()));
    }
    Ok(())
}

fn discard_temp(tmp: &Path) {
    if let Err(e) = std::fs::remove_file(tmp) {
        warn!("Failed to remove temporary file {}: {}", tmp.display(), e);
    }
}
