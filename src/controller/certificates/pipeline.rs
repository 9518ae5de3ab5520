//! # Certificate Pipeline Driver
//!
//! Issues CAs and leaves by running `openssl` through the [`ProcessExecutor`],
//! verifies what was signed, and keeps chain metadata next to the artifacts.
//!
//! New leaf material is written to `*.new` files and only renamed over the
//! live `<name>.crt`/`<name>.key` after the SAN read-back matches, so a failed
//! rotation leaves the previous leaf untouched.

use super::error::{CertificateError, SigningStage};
use super::openssl;
use super::permissions::{secure_private_key, set_certificate_mode};
use super::{CaIdentity, CertificateChain, CertificatePhase, KeyHandle, LeafRequest};
use crate::constants::{
    DEFAULT_CA_KEY_BITS, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_LEAF_KEY_BITS, MAX_DIAGNOSTIC_CHARS,
};
use crate::controller::executor::classify::{bounded, diagnostic};
use crate::controller::executor::{
    ExecOptions, ExecutionResult, Outcome, OutcomeClassifier, ProcessExecutor,
};
use crate::controller::parser::{self, json, MalformedOutputError};
use crate::observability::metrics;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Files belonging to one leaf in the store
#[derive(Debug, Clone)]
pub(crate) struct LeafPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub meta: PathBuf,
    pub staged_cert: PathBuf,
    pub staged_key: PathBuf,
    pub csr: PathBuf,
}

pub struct CertificatePipeline {
    executor: Arc<dyn ProcessExecutor>,
    classifier: OutcomeClassifier,
    openssl: String,
    store_dir: PathBuf,
    timeout: Duration,
    ca_key_bits: u32,
    leaf_key_bits: u32,
}

impl std::fmt::Debug for CertificatePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificatePipeline")
            .field("openssl", &self.openssl)
            .field("store_dir", &self.store_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CertificatePipeline {
    #[must_use]
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        classifier: OutcomeClassifier,
        openssl: impl Into<String>,
        store_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executor,
            classifier,
            openssl: openssl.into(),
            store_dir: store_dir.into(),
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            ca_key_bits: DEFAULT_CA_KEY_BITS,
            leaf_key_bits: DEFAULT_LEAF_KEY_BITS,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_key_bits(mut self, ca_key_bits: u32, leaf_key_bits: u32) -> Self {
        self.ca_key_bits = ca_key_bits;
        self.leaf_key_bits = leaf_key_bits;
        self
    }

    #[must_use]
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub(crate) fn executor(&self) -> &Arc<dyn ProcessExecutor> {
        &self.executor
    }

    pub(crate) fn classifier(&self) -> &OutcomeClassifier {
        &self.classifier
    }

    pub(crate) fn exec_options(&self) -> ExecOptions {
        ExecOptions::with_timeout(self.timeout)
    }

    fn ca_paths(&self) -> (PathBuf, PathBuf, PathBuf) {
        (
            self.store_dir.join("ca.crt"),
            self.store_dir.join("ca.key"),
            self.store_dir.join("ca.json"),
        )
    }

    pub(crate) fn leaf_paths(&self, name: &str) -> LeafPaths {
        LeafPaths {
            cert: self.store_dir.join(format!("{name}.crt")),
            key: self.store_dir.join(format!("{name}.key")),
            meta: self.store_dir.join(format!("{name}.chain.json")),
            staged_cert: self.store_dir.join(format!("{name}.crt.new")),
            staged_key: self.store_dir.join(format!("{name}.key.new")),
            csr: self.store_dir.join(format!("{name}.csr")),
        }
    }

    /// Run `openssl` and map a logical failure through `on_failure`
    async fn run_openssl(
        &self,
        args: Vec<String>,
        on_failure: impl FnOnce(String) -> CertificateError,
    ) -> Result<ExecutionResult, CertificateError> {
        let result = self
            .executor
            .run(&self.openssl, &args, &self.exec_options())
            .await?;
        match self.classifier.classify(&result) {
            Outcome::Succeeded => Ok(result),
            Outcome::NotFound => Err(on_failure(diagnostic(&result))),
            Outcome::Failed { message, .. } => Err(on_failure(message)),
        }
    }

    async fn read_dates(
        &self,
        cert: &Path,
        on_failure: impl FnOnce(String) -> CertificateError,
    ) -> Result<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>), CertificateError>
    {
        let result = self
            .executor
            .run(&self.openssl, &openssl::read_dates_args(cert), &self.exec_options())
            .await?;
        openssl::parse_dates_output(&result.stdout).ok_or_else(|| {
            on_failure(format!(
                "unreadable validity dates: {}",
                bounded(result.stdout.trim(), MAX_DIAGNOSTIC_CHARS)
            ))
        })
    }

    async fn ensure_store_dir(&self) -> Result<(), CertificateError> {
        tokio::fs::create_dir_all(&self.store_dir)
            .await
            .map_err(CertificateError::io(&self.store_dir))
    }

    /// Generate a self-signed root CA in the store
    ///
    /// Every call produces a new CA with a fresh key and id, replacing any CA
    /// already at the store path. Use [`Self::ensure_ca`] to gate on existence.
    ///
    /// # Errors
    ///
    /// [`CertificateError::CaGeneration`] when `openssl` fails, plus
    /// permission and I/O errors.
    pub async fn issue_ca(
        &self,
        common_name: &str,
        validity_days: u32,
    ) -> Result<CaIdentity, CertificateError> {
        validate_subject(common_name)?;
        if validity_days == 0 {
            return Err(CertificateError::InvalidRequest(
                "CA validity must be at least one day".to_string(),
            ));
        }
        let span = info_span!("certificate.issue_ca", ca.common_name = common_name);
        async move {
            self.ensure_store_dir().await?;
            let (cert_path, key_path, meta_path) = self.ca_paths();
            let ca_failure = |message: String| CertificateError::CaGeneration {
                common_name: common_name.to_string(),
                message,
            };

            self.run_openssl(
                openssl::self_signed_ca_args(
                    &key_path,
                    &cert_path,
                    common_name,
                    validity_days,
                    self.ca_key_bits,
                ),
                ca_failure,
            )
            .await?;
            secure_private_key(&key_path).await?;
            set_certificate_mode(&cert_path).await?;
            let (_, not_after) = self.read_dates(&cert_path, ca_failure).await?;

            let identity = CaIdentity {
                id: Uuid::new_v4().to_string(),
                common_name: common_name.to_string(),
                cert_path,
                key_path,
                not_after,
            };
            write_json_atomic(&meta_path, &identity)?;
            info!(
                "Issued CA '{}' (id {}, expires {})",
                identity.common_name, identity.id, identity.not_after
            );
            Ok(identity)
        }
        .instrument(span)
        .await
    }

    /// The CA currently in the store, if its metadata and both files exist
    ///
    /// # Errors
    ///
    /// [`CertificateError::Metadata`] for an unreadable `ca.json`.
    pub async fn load_ca(&self) -> Result<Option<CaIdentity>, CertificateError> {
        let (cert_path, key_path, meta_path) = self.ca_paths();
        if !cert_path.exists() || !key_path.exists() {
            return Ok(None);
        }
        let Some(raw) = read_optional(&meta_path).await? else {
            return Ok(None);
        };
        let identity: CaIdentity = serde_json::from_str(&raw).map_err(|e| {
            MalformedOutputError::new("CA identity", e.to_string(), json::snippet(&raw))
        })?;
        Ok(Some(identity))
    }

    /// Return the stored CA, issuing one only when none exists at the path
    ///
    /// # Errors
    ///
    /// Any error from [`Self::load_ca`] or [`Self::issue_ca`].
    pub async fn ensure_ca(
        &self,
        common_name: &str,
        validity_days: u32,
    ) -> Result<CaIdentity, CertificateError> {
        if let Some(existing) = self.load_ca().await? {
            debug!("Reusing CA '{}' ({})", existing.common_name, existing.id);
            return Ok(existing);
        }
        self.issue_ca(common_name, validity_days).await
    }

    /// Create a key, CSR and CA-signed leaf carrying every requested SAN
    ///
    /// A fresh key is always generated. The signed certificate's SAN list is
    /// read back and must equal the request exactly.
    ///
    /// # Errors
    ///
    /// [`CertificateError::Signing`] naming the failed stage,
    /// [`CertificateError::InvalidRequest`] for unusable names, plus
    /// permission and I/O errors. The live leaf files are untouched on error.
    pub async fn issue_leaf(
        &self,
        ca: &CaIdentity,
        request: &LeafRequest,
    ) -> Result<CertificateChain, CertificateError> {
        validate_leaf_name(&request.name)?;
        validate_subject(&request.common_name)?;
        if request.validity_days == 0 {
            return Err(CertificateError::InvalidRequest(
                "leaf validity must be at least one day".to_string(),
            ));
        }
        let extensions = openssl::leaf_extensions(&request.subject_alt_names).map_err(|name| {
            CertificateError::InvalidRequest(format!("unusable subject alternative name '{name}'"))
        })?;

        let span = info_span!(
            "certificate.issue_leaf",
            certificate.name = %request.name,
            certificate.sans = request.subject_alt_names.len()
        );
        let paths = self.leaf_paths(&request.name);
        let result = self
            .mint_leaf(ca, request, &extensions, &paths)
            .instrument(span)
            .await;

        // Staged files only survive a successful mint as the renamed live files
        for leftover in [&paths.staged_key, &paths.staged_cert, &paths.csr] {
            if let Err(e) = tokio::fs::remove_file(leftover).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", leftover.display(), e);
                }
            }
        }
        result
    }

    async fn mint_leaf(
        &self,
        ca: &CaIdentity,
        request: &LeafRequest,
        extensions: &str,
        paths: &LeafPaths,
    ) -> Result<CertificateChain, CertificateError> {
        self.ensure_store_dir().await?;
        let failure = |stage: SigningStage| {
            let name = request.name.clone();
            move |message: String| CertificateError::Signing {
                name,
                stage,
                message,
            }
        };

        self.run_openssl(
            openssl::generate_key_args(&paths.staged_key, self.leaf_key_bits),
            failure(SigningStage::KeyGeneration),
        )
        .await?;
        secure_private_key(&paths.staged_key).await?;
        debug!("{}: {}", request.name, CertificatePhase::KeyGenerated);

        self.run_openssl(
            openssl::csr_args(&paths.staged_key, &paths.csr, &request.common_name),
            failure(SigningStage::Csr),
        )
        .await?;
        debug!("{}: {}", request.name, CertificatePhase::CsrIssued);

        let mut ext_file = tempfile::Builder::new()
            .prefix(".ext-")
            .tempfile_in(&self.store_dir)
            .map_err(CertificateError::io(&self.store_dir))?;
        ext_file
            .write_all(extensions.as_bytes())
            .map_err(CertificateError::io(ext_file.path()))?;
        let serial = Uuid::new_v4().simple().to_string();
        self.run_openssl(
            openssl::sign_args(
                &paths.csr,
                &ca.cert_path,
                &ca.key_path,
                &paths.staged_cert,
                ext_file.path(),
                request.validity_days,
                &serial,
            ),
            failure(SigningStage::Sign),
        )
        .await?;
        drop(ext_file);

        let san_output = self
            .run_openssl(
                openssl::read_sans_args(&paths.staged_cert),
                failure(SigningStage::SanVerification),
            )
            .await?;
        let signed_sans = openssl::parse_san_output(&san_output.stdout);
        let requested: BTreeSet<String> = request
            .subject_alt_names
            .iter()
            .map(|name| openssl::normalise_name(name))
            .collect();
        if signed_sans != requested {
            let missing: Vec<_> = requested.difference(&signed_sans).collect();
            let unexpected: Vec<_> = signed_sans.difference(&requested).collect();
            return Err(failure(SigningStage::SanVerification)(format!(
                "signed SANs differ from request (missing {missing:?}, unexpected {unexpected:?})"
            )));
        }

        let (not_before, not_after) = self
            .read_dates(&paths.staged_cert, failure(SigningStage::Sign))
            .await?;

        tokio::fs::rename(&paths.staged_key, &paths.key)
            .await
            .map_err(CertificateError::io(&paths.key))?;
        tokio::fs::rename(&paths.staged_cert, &paths.cert)
            .await
            .map_err(CertificateError::io(&paths.cert))?;
        set_certificate_mode(&paths.cert).await?;

        let chain = CertificateChain {
            common_name: request.common_name.clone(),
            subject_alt_names: request.subject_alt_names.clone(),
            not_before,
            not_after,
            issuer_ref: ca.clone(),
            key_material: KeyHandle::new(&paths.key),
            cert_path: paths.cert.clone(),
            validity_days: request.validity_days,
            phase: CertificatePhase::Signed,
        };
        self.save_chain(&chain)?;
        info!(
            "Signed leaf '{}' for {} with {} SAN(s), valid until {}",
            request.name,
            request.common_name,
            request.subject_alt_names.len(),
            not_after
        );
        Ok(chain)
    }

    /// Mint a replacement leaf with the same CA, subject, SANs and validity
    ///
    /// The old key is never reused.
    ///
    /// # Errors
    ///
    /// [`CertificateError::InvalidTransition`] for a revoked chain, otherwise
    /// any error from [`Self::issue_leaf`].
    pub async fn rotate(&self, chain: &CertificateChain) -> Result<CertificateChain, CertificateError> {
        self.reissue(chain, &chain.issuer_ref, &LeafRequest::from_chain(chain))
            .await
    }

    /// Replace `chain` with a leaf minted from `request` under `ca`
    ///
    /// Used for rotation and for subject or SAN changes.
    ///
    /// # Errors
    ///
    /// As for [`Self::rotate`].
    pub async fn reissue(
        &self,
        chain: &CertificateChain,
        ca: &CaIdentity,
        request: &LeafRequest,
    ) -> Result<CertificateChain, CertificateError> {
        let mut renewing = chain.clone();
        renewing.advance(CertificatePhase::Renewing)?;
        self.save_chain(&renewing)?;

        let fresh = self.issue_leaf(ca, request).await?;
        metrics::increment_certificates_rotated();
        info!(
            "Rotated '{}': {} -> {}",
            request.name, chain.not_after, fresh.not_after
        );
        Ok(fresh)
    }

    /// Record that `chain` entered its renewal window
    ///
    /// # Errors
    ///
    /// [`CertificateError::InvalidTransition`] or a metadata write failure.
    pub fn mark_near_expiry(&self, chain: &mut CertificateChain) -> Result<(), CertificateError> {
        if chain.phase != CertificatePhase::NearExpiry {
            chain.advance(CertificatePhase::NearExpiry)?;
            self.save_chain(chain)?;
        }
        Ok(())
    }

    /// Destroy the leaf key material and mark the chain revoked
    ///
    /// # Errors
    ///
    /// [`CertificateError::InvalidTransition`] for an already revoked chain,
    /// or an I/O error removing the key.
    pub async fn revoke(&self, chain: &CertificateChain) -> Result<CertificateChain, CertificateError> {
        let mut revoked = chain.clone();
        revoked.advance(CertificatePhase::Revoked)?;
        match tokio::fs::remove_file(chain.key_material.path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CertificateError::io(chain.key_material.path())(e)),
        }
        self.save_chain(&revoked)?;
        info!("Revoked leaf '{}'", revoked.name());
        Ok(revoked)
    }

    /// Stored chain metadata for leaf `name`
    ///
    /// # Errors
    ///
    /// [`CertificateError::Metadata`] for an unreadable metadata file.
    pub async fn load_chain(&self, name: &str) -> Result<Option<CertificateChain>, CertificateError> {
        let paths = self.leaf_paths(name);
        match read_optional(&paths.meta).await? {
            Some(raw) => Ok(Some(parser::parse_certificate_chain(&raw)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn save_chain(&self, chain: &CertificateChain) -> Result<(), CertificateError> {
        let paths = self.leaf_paths(chain.name());
        write_json_atomic(&paths.meta, chain)
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, CertificateError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CertificateError::io(path)(e)),
    }
}

/// Write `value` as pretty JSON via a temp file in the same directory
fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), CertificateError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let body = serde_json::to_vec_pretty(value).map_err(|e| CertificateError::Io {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".meta-")
        .tempfile_in(dir)
        .map_err(CertificateError::io(dir))?;
    tmp.write_all(&body).map_err(CertificateError::io(path))?;
    tmp.persist(path)
        .map_err(|e| CertificateError::io(path)(e.error))?;
    Ok(())
}

fn validate_subject(common_name: &str) -> Result<(), CertificateError> {
    if common_name.trim().is_empty() || common_name.contains(['/', '\n', '\r', '=']) {
        return Err(CertificateError::InvalidRequest(format!(
            "unusable common name '{common_name}'"
        )));
    }
    Ok(())
}

fn validate_leaf_name(name: &str) -> Result<(), CertificateError> {
    let valid = !name.is_empty()
        && name != "ca"
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(CertificateError::InvalidRequest(format!(
            "leaf name '{name}' must be a plain file name other than 'ca'"
        )))
    }
}
