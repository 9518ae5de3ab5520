//! # Deploy
//!
//! Copies a signed chain into a service's certificate directory and reloads
//! the services that read it.
//!
//! ## Ordering
//!
//! 1. **Stage** every file as a temp file in the target directory (key files
//!    are `0600` before any byte is written)
//! 2. **Activate** by atomic rename over the live names, keeping backups
//! 3. **Validate** each dependent service's configuration
//! 4. On any validation failure, restore the backups and stop: no reload
//! 5. **Reload** each service only after every validation passed; backups
//!    are dropped first, so a failed reload leaves the new files and no `.bak`
//!
//! Validate and reload are always two separate commands.

use super::error::CertificateError;
use super::permissions::{secure_private_key, set_certificate_mode};
use super::{CertificateChain, CertificatePhase, CertificatePipeline};
use crate::controller::executor::classify::diagnostic;
use crate::controller::executor::Outcome;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, warn, Instrument};
use zeroize::Zeroizing;

/// Where a chain is installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployTarget {
    pub dir: PathBuf,
    /// Leaf followed by the CA certificate; defaults to `<name>.crt`
    #[serde(default)]
    pub cert_file: Option<String>,
    /// Defaults to `<name>.key`
    #[serde(default)]
    pub key_file: Option<String>,
    /// Defaults to `ca.crt`
    #[serde(default)]
    pub ca_file: Option<String>,
}

impl DeployTarget {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cert_file: None,
            key_file: None,
            ca_file: None,
        }
    }

    fn cert_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(self.cert_file.clone().unwrap_or_else(|| format!("{name}.crt")))
    }

    fn key_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(self.key_file.clone().unwrap_or_else(|| format!("{name}.key")))
    }

    fn ca_path(&self) -> PathBuf {
        self.dir
            .join(self.ca_file.clone().unwrap_or_else(|| "ca.crt".to_string()))
    }
}

/// A dependent service's two-step reload hook
///
/// Each command is a full argv: the program followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadHook {
    pub name: String,
    /// e.g. `["nginx", "-t"]`
    pub validate: Vec<String>,
    /// e.g. `["nginx", "-s", "reload"]`
    pub reload: Vec<String>,
}

struct StagedFile {
    dest: PathBuf,
    tmp: tempfile::NamedTempFile,
}

struct ActivatedFile {
    dest: PathBuf,
    backup: Option<PathBuf>,
}

impl CertificatePipeline {
    /// Install `chain` into `target` and reload `services`
    ///
    /// # Errors
    ///
    /// [`CertificateError::ConfigValidation`] when any service rejects the new
    /// files; the previous files are restored and no reload is sent.
    /// [`CertificateError::Reload`] when a reload fails after validation.
    /// [`CertificateError::InsecurePermissions`] when the staged key cannot be
    /// made owner-only.
    pub async fn deploy(
        &self,
        chain: &CertificateChain,
        target: &DeployTarget,
        services: &[ReloadHook],
    ) -> Result<CertificateChain, CertificateError> {
        if !chain.phase.can_transition_to(CertificatePhase::Deployed) {
            return Err(CertificateError::InvalidTransition {
                from: chain.phase,
                to: CertificatePhase::Deployed,
            });
        }
        for hook in services {
            if hook.validate.is_empty() || hook.reload.is_empty() {
                return Err(CertificateError::InvalidRequest(format!(
                    "reload hook '{}' needs both a validate and a reload command",
                    hook.name
                )));
            }
        }

        let span = info_span!(
            "certificate.deploy",
            certificate.name = chain.name(),
            target = %target.dir.display(),
            services = services.len()
        );
        async move {
            tokio::fs::create_dir_all(&target.dir)
                .await
                .map_err(CertificateError::io(&target.dir))?;

            let name = chain.name();
            let leaf = read_file(&chain.cert_path).await?;
            let ca = read_file(&chain.issuer_ref.cert_path).await?;
            let key = Zeroizing::new(read_file(chain.key_material.path()).await?);
            let mut full_chain = leaf;
            full_chain.extend_from_slice(&ca);

            let staged = vec![
                stage(&target.dir, target.cert_path(name), &full_chain, false).await?,
                stage(&target.dir, target.key_path(name), &key, true).await?,
                stage(&target.dir, target.ca_path(), &ca, false).await?,
            ];
            let activated = activate(staged).await?;

            for hook in services {
                if let Err(e) = self.validate_service(hook).await {
                    error!(
                        "Validation failed for '{}', restoring previous certificate files",
                        hook.name
                    );
                    rollback(&activated).await;
                    return Err(e);
                }
            }

            // Validated files stay live even if a reload fails below
            discard_backups(&activated).await;
            for hook in services {
                self.reload_service(hook).await?;
            }

            let mut deployed = chain.clone();
            deployed.advance(CertificatePhase::Deployed)?;
            self.save_chain(&deployed)?;
            info!(
                "Deployed '{}' to {} and reloaded {} service(s)",
                name,
                target.dir.display(),
                services.len()
            );
            Ok(deployed)
        }
        .instrument(span)
        .await
    }

    async fn validate_service(&self, hook: &ReloadHook) -> Result<(), CertificateError> {
        let (program, args) = split_argv(&hook.validate);
        let result = self
            .executor()
            .run(program, args, &self.exec_options())
            .await?;
        match self.classifier().classify(&result) {
            Outcome::Succeeded => Ok(()),
            Outcome::NotFound => Err(CertificateError::ConfigValidation {
                service: hook.name.clone(),
                message: diagnostic(&result),
            }),
            Outcome::Failed { message, .. } => Err(CertificateError::ConfigValidation {
                service: hook.name.clone(),
                message,
            }),
        }
    }

    async fn reload_service(&self, hook: &ReloadHook) -> Result<(), CertificateError> {
        let (program, args) = split_argv(&hook.reload);
        let result = self
            .executor()
            .run(program, args, &self.exec_options())
            .await?;
        match self.classifier().classify(&result) {
            Outcome::Succeeded => {
                info!("Reloaded '{}'", hook.name);
                Ok(())
            }
            Outcome::NotFound => Err(CertificateError::Reload {
                service: hook.name.clone(),
                message: diagnostic(&result),
            }),
            Outcome::Failed { message, .. } => Err(CertificateError::Reload {
                service: hook.name.clone(),
                message,
            }),
        }
    }
}

fn split_argv(argv: &[String]) -> (&str, &[String]) {
    match argv.split_first() {
        Some((program, args)) => (program.as_str(), args),
        None => ("", &[]),
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, CertificateError> {
    tokio::fs::read(path).await.map_err(CertificateError::io(path))
}

/// Write `contents` to a temp file in `dir` with the final mode already set
async fn stage(
    dir: &Path,
    dest: PathBuf,
    contents: &[u8],
    private: bool,
) -> Result<StagedFile, CertificateError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".staged-")
        .tempfile_in(dir)
        .map_err(CertificateError::io(dir))?;
    if private {
        secure_private_key(tmp.path()).await?;
    }
    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(CertificateError::io(&dest))?;
    if !private {
        set_certificate_mode(tmp.path()).await?;
    }
    Ok(StagedFile { dest, tmp })
}

/// Rename every staged file over its live name, backing up what was there
async fn activate(staged: Vec<StagedFile>) -> Result<Vec<ActivatedFile>, CertificateError> {
    let mut activated = Vec::with_capacity(staged.len());
    for StagedFile { dest, tmp } in staged {
        let backup = if dest.exists() {
            let mut name = dest.as_os_str().to_owned();
            name.push(".bak");
            let backup = PathBuf::from(name);
            if let Err(e) = tokio::fs::copy(&dest, &backup).await {
                rollback(&activated).await;
                return Err(CertificateError::io(&backup)(e));
            }
            Some(backup)
        } else {
            None
        };

        if let Err(e) = tmp.persist(&dest) {
            let failed = ActivatedFile {
                dest: dest.clone(),
                backup,
            };
            discard_backups(std::slice::from_ref(&failed)).await;
            rollback(&activated).await;
            return Err(CertificateError::io(&dest)(e.error));
        }
        activated.push(ActivatedFile { dest, backup });
    }
    Ok(activated)
}

/// Put previous files back; files that did not exist before are removed
async fn rollback(activated: &[ActivatedFile]) {
    for file in activated.iter().rev() {
        let restored = match &file.backup {
            Some(backup) => tokio::fs::rename(backup, &file.dest).await,
            None => tokio::fs::remove_file(&file.dest).await,
        };
        if let Err(e) = restored {
            warn!("Failed to restore {}: {}", file.dest.display(), e);
        }
    }
}

async fn discard_backups(activated: &[ActivatedFile]) {
    for backup in activated.iter().filter_map(|f| f.backup.as_ref()) {
        if let Err(e) = tokio::fs::remove_file(backup).await {
            warn!("Failed to remove backup {}: {}", backup.display(), e);
        }
    }
}
