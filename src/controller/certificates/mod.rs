//! # Certificate Pipeline
//!
//! Builds and rotates a CA + leaf TLS chain through the `openssl` toolkit and
//! deploys it to dependent services.
//!
//! ## Phases
//!
//! ```text
//! NoCA → CAIssued → KeyGenerated → CSRIssued → Signed → Deployed
//!                                                 ▲         │
//!                                                 │         ▼
//!                                             Renewing ◄ NearExpiry
//!
//! any phase except Revoked → Revoked
//! ```
//!
//! ## Artifacts
//!
//! The store directory holds `ca.crt`, `ca.key`, `ca.json`, and per leaf
//! `<name>.crt`, `<name>.key` and `<name>.chain.json`. Key files are `0600`;
//! metadata files carry paths, never key contents.

pub mod deploy;
pub mod error;
pub mod openssl;
pub mod permissions;
pub mod pipeline;

pub use deploy::{DeployTarget, ReloadHook};
pub use error::CertificateError;
pub use pipeline::CertificatePipeline;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of a certificate authority in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaIdentity {
    /// Fresh per issuance; two CAs with the same common name stay distinct
    pub id: String,
    pub common_name: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub not_after: DateTime<Utc>,
}

/// Opaque reference to private key material
///
/// Holds the key file location only. `Debug` shows neither the path nor the
/// contents.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHandle(PathBuf);

impl KeyHandle {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Location of the key file; only the pipeline reads through it
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyHandle(<opaque>)")
    }
}

/// Lifecycle phase of a certificate chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificatePhase {
    #[serde(rename = "NoCA")]
    NoCa,
    #[serde(rename = "CAIssued")]
    CaIssued,
    KeyGenerated,
    #[serde(rename = "CSRIssued")]
    CsrIssued,
    Signed,
    Deployed,
    NearExpiry,
    Renewing,
    Revoked,
}

impl CertificatePhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificatePhase::NoCa => "NoCA",
            CertificatePhase::CaIssued => "CAIssued",
            CertificatePhase::KeyGenerated => "KeyGenerated",
            CertificatePhase::CsrIssued => "CSRIssued",
            CertificatePhase::Signed => "Signed",
            CertificatePhase::Deployed => "Deployed",
            CertificatePhase::NearExpiry => "NearExpiry",
            CertificatePhase::Renewing => "Renewing",
            CertificatePhase::Revoked => "Revoked",
        }
    }

    /// Whether the phase graph allows moving from `self` to `next`
    ///
    /// A signed or deployed chain may enter `Renewing` directly when it is
    /// re-issued for a changed subject. `Deployed → Deployed` is a redeploy.
    #[must_use]
    pub fn can_transition_to(&self, next: CertificatePhase) -> bool {
        use CertificatePhase::{
            CaIssued, CsrIssued, Deployed, KeyGenerated, NearExpiry, NoCa, Renewing, Revoked,
            Signed,
        };
        match (self, next) {
            (Revoked, _) => false,
            (_, Revoked) => true,
            (NoCa, CaIssued)
            | (CaIssued, KeyGenerated)
            | (KeyGenerated, CsrIssued)
            | (CsrIssued, Signed)
            | (Signed | Deployed, Deployed | NearExpiry | Renewing)
            | (NearExpiry, Renewing)
            | (Renewing, KeyGenerated | Signed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CertificatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed leaf certificate and the CA that issued it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateChain {
    pub common_name: String,
    pub subject_alt_names: BTreeSet<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub issuer_ref: CaIdentity,
    pub key_material: KeyHandle,
    pub cert_path: PathBuf,
    pub validity_days: u32,
    pub phase: CertificatePhase,
}

impl CertificateChain {
    /// Store name of the leaf (`<name>.crt` without the extension)
    #[must_use]
    pub fn name(&self) -> &str {
        self.cert_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.common_name)
    }

    /// Move to `next`, enforcing the phase graph
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError::InvalidTransition`] for an edge the graph
    /// does not contain.
    pub fn advance(&mut self, next: CertificatePhase) -> Result<(), CertificateError> {
        if !self.phase.can_transition_to(next) {
            return Err(CertificateError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }
}

/// What a new or re-issued leaf should contain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRequest {
    /// Store name for the leaf files
    pub name: String,
    pub common_name: String,
    pub subject_alt_names: BTreeSet<String>,
    pub validity_days: u32,
}

impl LeafRequest {
    /// Request to re-mint `chain` with the same subject and validity
    #[must_use]
    pub fn from_chain(chain: &CertificateChain) -> Self {
        Self {
            name: chain.name().to_string(),
            common_name: chain.common_name.clone(),
            subject_alt_names: chain.subject_alt_names.clone(),
            validity_days: chain.validity_days,
        }
    }
}

/// Result of [`check_rotation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDecision {
    RotationNeeded,
    RotationNotNeeded,
}

/// Whether `chain` is inside its renewal window at `now`
///
/// Needed iff `now >= notAfter - window_days`; the boundary instant itself
/// counts as needed.
#[must_use]
pub fn check_rotation(
    chain: &CertificateChain,
    window_days: i64,
    now: DateTime<Utc>,
) -> RotationDecision {
    let renew_from = Duration::try_days(window_days)
        .and_then(|window| chain.not_after.checked_sub_signed(window));
    match renew_from {
        Some(renew_from) if now < renew_from => RotationDecision::RotationNotNeeded,
        _ => RotationDecision::RotationNeeded,
    }
}
