//! # INFRACTL CLI
//!
//! Command-line interface for the infra reconciler.
//!
//! Drives the resources declared in a YAML manifest to their desired state
//! through the external CLIs configured for each kind. Results are printed to
//! stdout as JSON; logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Converge everything in a manifest
//! infractl apply -f infra.yaml
//!
//! # Preview without changing anything
//! infractl plan -f infra.yaml
//!
//! # Tear down one resource
//! infractl destroy -f infra.yaml --name w1
//!
//! # Certificates
//! infractl cert issue-ca --common-name "Edge Root"
//! infractl cert issue edge --san edge.local --san 10.0.0.5
//! infractl cert check edge
//! infractl cert rotate edge
//! infractl cert deploy edge --dir /etc/nginx/tls --hook nginx -f infra.yaml
//!
//! # Secret bundles
//! infractl secret push app-secrets --file app.env --scope project=acme
//! infractl secret pull app-secrets --out app.env --scope project=acme
//!
//! # Write Prometheus text exposition for a textfile collector
//! infractl apply -f infra.yaml --metrics-file /var/lib/node_exporter/infractl.prom
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use infra_reconciler::observability::metrics;
use infra_reconciler::runtime;
use std::path::{Path, PathBuf};
use tracing::warn;

mod apply;
mod cert;
mod destroy;
mod output;
mod plan;
mod secret;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_GIT_HASH"),
    ", built ",
    env!("BUILD_DATETIME"),
    ")"
);

/// Infra reconciler CLI
#[derive(Parser)]
#[command(name = "infractl")]
#[command(
    version = VERSION,
    about = "Reconcile VMs, TLS certificate chains and secret bundles",
    long_about = None,
    after_help = "\
Resource kinds:
  VM            - compute instance (gcloud compute instances)
  Certificate   - CA-signed leaf certificate (openssl)
  SecretBundle  - ordered KEY=VALUE bundle (gcloud secrets)

Examples:
  infractl plan -f infra.yaml
  infractl apply -f infra.yaml
  infractl cert check edge
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Write Prometheus text exposition to this file when the command ends
    #[arg(long, global = true, value_name = "PATH")]
    metrics_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Converge every declared resource to its desired state
    Apply {
        /// Resource manifest
        #[arg(short = 'f', long = "file", value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Only apply resources with this name
        #[arg(long)]
        name: Option<String>,
    },
    /// Show what apply would do without changing anything
    Plan {
        /// Resource manifest
        #[arg(short = 'f', long = "file", value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Only plan resources with this name
        #[arg(long)]
        name: Option<String>,
    },
    /// Destroy declared resources in reverse declaration order
    Destroy {
        /// Resource manifest
        #[arg(short = 'f', long = "file", value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Only destroy resources with this name
        #[arg(long)]
        name: Option<String>,
    },
    /// Certificate authority and leaf certificate operations
    #[command(subcommand)]
    Cert(cert::CertCommands),
    /// Push or pull secret bundles
    #[command(subcommand)]
    Secret(secret::SecretCommands),
}

impl Commands {
    fn manifest_path(&self) -> Option<&Path> {
        match self {
            Commands::Apply { manifest, .. }
            | Commands::Plan { manifest, .. }
            | Commands::Destroy { manifest, .. } => Some(manifest),
            Commands::Cert(cmd) => cmd.manifest_path(),
            Commands::Secret(_) => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = runtime::initialize(cli.command.manifest_path()).await?;

    let result = match cli.command {
        Commands::Apply { name, .. } => apply::apply_command(&ctx, name.as_deref()).await,
        Commands::Plan { name, .. } => plan::plan_command(&ctx, name.as_deref()).await,
        Commands::Destroy { name, .. } => destroy::destroy_command(&ctx, name.as_deref()).await,
        Commands::Cert(cmd) => cert::cert_command(&ctx, cmd).await,
        Commands::Secret(cmd) => secret::secret_command(&ctx, cmd).await,
    };

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = write_metrics(path) {
            warn!("Failed to write metrics to {}: {:#}", path.display(), e);
        }
    }

    result
}

/// Write the text exposition via a temp file and rename, so collectors never
/// read a partial file
fn write_metrics(path: &Path) -> Result<()> {
    let text = metrics::gather_text()?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    std::io::Write::write_all(&mut tmp, text.as_bytes())?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_takes_manifest_and_name() {
        let cli = Cli::try_parse_from(["infractl", "apply", "-f", "infra.yaml", "--name", "w1"])
            .expect("apply should parse");
        assert_eq!(cli.command.manifest_path(), Some(Path::new("infra.yaml")));
        match cli.command {
            Commands::Apply { name, .. } => assert_eq!(name.as_deref(), Some("w1")),
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_metrics_file_is_global() {
        let cli = Cli::try_parse_from([
            "infractl",
            "plan",
            "-f",
            "infra.yaml",
            "--metrics-file",
            "/tmp/infractl.prom",
        ])
        .expect("plan should parse");
        assert_eq!(cli.metrics_file, Some(PathBuf::from("/tmp/infractl.prom")));
    }

    #[test]
    fn test_cert_issue_accepts_repeated_and_comma_separated_sans() {
        let cli = Cli::try_parse_from([
            "infractl",
            "cert",
            "issue",
            "edge",
            "--san",
            "edge.local,api.edge.local",
            "--san",
            "10.0.0.5",
        ])
        .expect("cert issue should parse");
        assert_eq!(cli.command.manifest_path(), None);
        match cli.command {
            Commands::Cert(cert::CertCommands::Issue {
                subject_alt_names, ..
            }) => assert_eq!(
                subject_alt_names,
                vec!["edge.local", "api.edge.local", "10.0.0.5"]
            ),
            _ => panic!("expected cert issue"),
        }
    }

    #[test]
    fn test_apply_requires_a_manifest() {
        assert!(Cli::try_parse_from(["infractl", "apply"]).is_err());
    }

    #[test]
    fn test_write_metrics_replaces_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("infractl.prom");
        std::fs::write(&path, "stale").expect("write");
        metrics::register_metrics().expect("register");
        metrics::increment_certificates_rotated();

        write_metrics(&path).expect("metrics should be written");
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("infra_reconciler_certificates_rotated_total"));
    }
}
