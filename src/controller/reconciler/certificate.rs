//! # Certificate Reconciliation
//!
//! Maps a `Certificate` spec onto the certificate pipeline:
//!
//! - ensure the CA exists (an existing CA is reused)
//! - issue the leaf if there is none or it was revoked
//! - re-issue on a CA, common name, SAN or validity change
//! - rotate inside the renewal window
//! - deploy when `deploy_dir` is declared and the chain changed or was never
//!   deployed
//!
//! ## Parameters
//!
//! | Parameter             | Default                          |
//! |-----------------------|----------------------------------|
//! | `common_name`         | resource name                    |
//! | `subject_alt_names`   | the common name                  |
//! | `validity_days`       | `LEAF_VALIDITY_DAYS`             |
//! | `ca_common_name`      | `infra-reconciler root CA`       |
//! | `ca_validity_days`    | `CA_VALIDITY_DAYS`               |
//! | `renewal_window_days` | `RENEWAL_WINDOW_DAYS`            |
//! | `deploy_dir`          | none (no deploy)                 |
//! | `cert_file`, `key_file`, `ca_file` | see [`DeployTarget`] |
//! | `reload_hooks`        | none; comma-separated hook names |

use super::error::ReconcilerError;
use super::types::Reconciler;
use crate::controller::certificates::openssl::normalise_name;
use crate::controller::certificates::{
    check_rotation, CaIdentity, CertificateChain, CertificatePhase, DeployTarget, LeafRequest,
    ReloadHook, RotationDecision,
};
use crate::controller::resource::{ResourceSpec, ResourceState, ResourceStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::{debug, info, warn};

const DEFAULT_CA_COMMON_NAME: &str = "infra-reconciler root CA";

/// Typed view of a `Certificate` spec's parameters
#[derive(Debug, Clone)]
pub(crate) struct CertificateParams {
    pub request: LeafRequest,
    pub ca_common_name: String,
    pub ca_validity_days: u32,
    pub window_days: i64,
    pub target: Option<DeployTarget>,
    pub hooks: Vec<ReloadHook>,
}

/// What has to happen to the stored leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LeafAction {
    /// No usable leaf: mint a fresh one
    Issue,
    /// The leaf no longer matches its declaration
    Reissue { reason: String },
    /// The leaf is inside its renewal window
    Rotate,
    Keep,
}

/// Decide what to do with `chain` given the current CA and spec
#[must_use]
pub(crate) fn leaf_action(
    chain: Option<&CertificateChain>,
    ca: Option<&CaIdentity>,
    params: &CertificateParams,
    now: DateTime<Utc>,
) -> LeafAction {
    let Some(chain) = chain else {
        return LeafAction::Issue;
    };
    let reissue = |reason: &str| LeafAction::Reissue {
        reason: reason.to_string(),
    };
    match chain.phase {
        CertificatePhase::Revoked => return LeafAction::Issue,
        // An interrupted issuance left no signed leaf to rotate from
        CertificatePhase::NoCa
        | CertificatePhase::CaIssued
        | CertificatePhase::KeyGenerated
        | CertificatePhase::CsrIssued
        | CertificatePhase::Renewing => return LeafAction::Issue,
        CertificatePhase::Signed | CertificatePhase::Deployed | CertificatePhase::NearExpiry => {}
    }

    let request = &params.request;
    if ca.is_some_and(|ca| ca.id != chain.issuer_ref.id) {
        return reissue("issuing CA changed");
    }
    if chain.common_name != request.common_name {
        return reissue("common name changed");
    }
    let stored: BTreeSet<String> = chain
        .subject_alt_names
        .iter()
        .map(|n| normalise_name(n))
        .collect();
    if stored != request.subject_alt_names {
        return reissue("subject alternative names changed");
    }
    if chain.validity_days != request.validity_days {
        return reissue("validity changed");
    }
    if !chain.key_material.path().exists() || !chain.cert_path.exists() {
        return reissue("leaf files missing from store");
    }
    match check_rotation(chain, params.window_days, now) {
        RotationDecision::RotationNeeded => LeafAction::Rotate,
        RotationDecision::RotationNotNeeded => LeafAction::Keep,
    }
}

/// Observed state of a chain
pub(crate) fn certificate_state(spec: &ResourceSpec, chain: Option<&CertificateChain>) -> ResourceState {
    let Some(chain) = chain else {
        return ResourceState::absent(spec.kind, &spec.name);
    };
    let status = match chain.phase {
        CertificatePhase::Signed | CertificatePhase::Deployed => ResourceStatus::Ready,
        CertificatePhase::NearExpiry => ResourceStatus::Degraded,
        CertificatePhase::Revoked | CertificatePhase::NoCa => ResourceStatus::Absent,
        CertificatePhase::CaIssued
        | CertificatePhase::KeyGenerated
        | CertificatePhase::CsrIssued
        | CertificatePhase::Renewing => ResourceStatus::Creating,
    };
    let mut attributes = BTreeMap::new();
    attributes.insert("commonName".to_string(), chain.common_name.clone());
    attributes.insert(
        "subjectAltNames".to_string(),
        chain
            .subject_alt_names
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(","),
    );
    attributes.insert("notBefore".to_string(), chain.not_before.to_rfc3339());
    attributes.insert("notAfter".to_string(), chain.not_after.to_rfc3339());
    attributes.insert("phase".to_string(), chain.phase.as_str().to_string());
    attributes.insert("issuerId".to_string(), chain.issuer_ref.id.clone());
    attributes.insert(
        "certPath".to_string(),
        chain.cert_path.display().to_string(),
    );
    ResourceState {
        kind: spec.kind,
        name: spec.name.clone(),
        external_id: None,
        status,
        attributes,
    }
}

fn parse_number<T: FromStr>(
    spec: &ResourceSpec,
    key: &str,
    default: T,
) -> Result<T, ReconcilerError> {
    match spec.parameter(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ReconcilerError::InvalidSpec {
            key: spec.key(),
            message: format!("parameter '{key}' must be a number, got '{raw}'"),
        }),
    }
}

fn comma_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

impl Reconciler {
    pub(crate) fn certificate_params(
        &self,
        spec: &ResourceSpec,
    ) -> Result<CertificateParams, ReconcilerError> {
        let key = spec.key();
        let common_name = spec
            .parameter("common_name")
            .unwrap_or(&spec.name)
            .trim()
            .to_string();
        let mut subject_alt_names: BTreeSet<String> = spec
            .parameter("subject_alt_names")
            .map(|raw| comma_list(raw).map(normalise_name).collect())
            .unwrap_or_default();
        if subject_alt_names.is_empty() {
            subject_alt_names.insert(normalise_name(&common_name));
        }

        let request = LeafRequest {
            name: spec.name.clone(),
            common_name,
            subject_alt_names,
            validity_days: parse_number(spec, "validity_days", self.config.leaf_validity_days)?,
        };

        let target = spec.parameter("deploy_dir").map(|dir| DeployTarget {
            dir: dir.into(),
            cert_file: spec.parameter("cert_file").map(str::to_string),
            key_file: spec.parameter("key_file").map(str::to_string),
            ca_file: spec.parameter("ca_file").map(str::to_string),
        });

        let hooks = spec
            .parameter("reload_hooks")
            .map(comma_list)
            .into_iter()
            .flatten()
            .map(|name| {
                self.reload_hooks
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ReconcilerError::InvalidSpec {
                        key: key.clone(),
                        message: format!("unknown reload hook '{name}'"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !hooks.is_empty() && target.is_none() {
            return Err(ReconcilerError::InvalidSpec {
                key,
                message: "reload_hooks requires deploy_dir".to_string(),
            });
        }

        Ok(CertificateParams {
            request,
            ca_common_name: spec
                .parameter("ca_common_name")
                .unwrap_or(DEFAULT_CA_COMMON_NAME)
                .to_string(),
            ca_validity_days: parse_number(
                spec,
                "ca_validity_days",
                self.config.ca_validity_days,
            )?,
            window_days: parse_number(spec, "renewal_window_days", self.config.renewal_window_days)?,
            target,
            hooks,
        })
    }

    pub(crate) async fn certificate_state(
        &self,
        spec: &ResourceSpec,
    ) -> Result<ResourceState, ReconcilerError> {
        let chain = self.certificates.load_chain(&spec.name).await?;
        Ok(certificate_state(spec, chain.as_ref()))
    }

    pub(crate) async fn reconcile_certificate(
        &self,
        spec: &ResourceSpec,
    ) -> Result<ResourceState, ReconcilerError> {
        let params = self.certificate_params(spec)?;
        let pipeline = &self.certificates;

        let ca = pipeline
            .ensure_ca(&params.ca_common_name, params.ca_validity_days)
            .await?;
        if ca.common_name != params.ca_common_name {
            warn!(
                "Store CA is '{}', not the declared '{}'; keeping the existing CA",
                ca.common_name, params.ca_common_name
            );
        }

        let stored = pipeline.load_chain(&spec.name).await?;
        let action = leaf_action(stored.as_ref(), Some(&ca), &params, Utc::now());
        let (mut chain, changed) = match (action, stored) {
            (LeafAction::Keep, Some(chain)) => {
                debug!("Leaf '{}' is current until {}", spec.name, chain.not_after);
                (chain, false)
            }
            (LeafAction::Rotate, Some(mut chain)) => {
                info!(
                    "Leaf '{}' expires {} (window {} days), rotating",
                    spec.name, chain.not_after, params.window_days
                );
                pipeline.mark_near_expiry(&mut chain)?;
                (pipeline.reissue(&chain, &ca, &params.request).await?, true)
            }
            (LeafAction::Reissue { reason }, Some(chain)) => {
                info!("Re-issuing leaf '{}': {}", spec.name, reason);
                (pipeline.reissue(&chain, &ca, &params.request).await?, true)
            }
            _ => {
                info!("Issuing leaf '{}'", spec.name);
                (pipeline.issue_leaf(&ca, &params.request).await?, true)
            }
        };

        if let Some(target) = &params.target {
            if changed || chain.phase != CertificatePhase::Deployed {
                chain = pipeline.deploy(&chain, target, &params.hooks).await?;
            }
        }
        Ok(certificate_state(spec, Some(&chain)))
    }

    pub(crate) async fn destroy_certificate(
        &self,
        spec: &ResourceSpec,
    ) -> Result<ResourceState, ReconcilerError> {
        match self.certificates.load_chain(&spec.name).await? {
            Some(chain) if chain.phase != CertificatePhase::Revoked => {
                let revoked = self.certificates.revoke(&chain).await?;
                Ok(certificate_state(spec, Some(&revoked)))
            }
            _ => Ok(ResourceState::absent(spec.kind, &spec.name)),
        }
    }

    /// Planned leaf action without touching the store
    pub(crate) async fn certificate_plan(
        &self,
        spec: &ResourceSpec,
    ) -> Result<(ResourceState, LeafAction, bool), ReconcilerError> {
        let params = self.certificate_params(spec)?;
        let ca = self.certificates.load_ca().await?;
        let chain = self.certificates.load_chain(&spec.name).await?;
        let action = match (&ca, &chain) {
            (None, _) => LeafAction::Issue,
            (Some(ca), chain) => leaf_action(chain.as_ref(), Some(ca), &params, Utc::now()),
        };
        let deploy = params.target.is_some()
            && (action != LeafAction::Keep
                || chain
                    .as_ref()
                    .is_some_and(|c| c.phase != CertificatePhase::Deployed));
        Ok((certificate_state(spec, chain.as_ref()), action, deploy))
    }
}
