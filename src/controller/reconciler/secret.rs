//! # Secret Bundle Reconciliation
//!
//! The remote bundle is fetched, compared with the desired one by SHA-256
//! digest, and rewritten as a whole when they differ. Values only ever travel
//! on the child's stdin; logs and errors carry entry counts and digests.

use super::error::ReconcilerError;
use super::reconcile::invalid_spec;
use super::types::Reconciler;
use crate::controller::resource::{ResourceSpec, ResourceState, ResourceStatus};
use crate::controller::secrets::{self, SecretBundle};
use crate::observability::metrics;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Observed state of a bundle; `None` is an absent bundle
pub(crate) fn secret_state(spec: &ResourceSpec, bundle: Option<&SecretBundle>) -> ResourceState {
    let Some(bundle) = bundle else {
        return ResourceState::absent(spec.kind, &spec.name);
    };
    let mut attributes = BTreeMap::new();
    attributes.insert("entries".to_string(), bundle.len().to_string());
    attributes.insert("digest".to_string(), bundle.digest());
    ResourceState {
        kind: spec.kind,
        name: spec.name.clone(),
        external_id: None,
        status: ResourceStatus::Ready,
        attributes,
    }
}

fn already_exists(err: &ReconcilerError) -> bool {
    match err {
        ReconcilerError::ExternalCommandFailed { message, .. } => {
            let message = message.to_ascii_lowercase();
            message.contains("already exists") || message.contains("already_exists")
        }
        _ => false,
    }
}

impl Reconciler {
    /// Current remote contents of `spec`'s bundle
    pub(crate) async fn fetch_secret(
        &self,
        spec: &ResourceSpec,
    ) -> Result<Option<SecretBundle>, ReconcilerError> {
        self.describe_with(spec, |raw| secrets::from_remote(&spec.name, raw))
            .await
    }

    /// Fetch bundle `spec.name` from the remote store
    ///
    /// Only `spec`'s scope parameters are used.
    ///
    /// # Errors
    ///
    /// [`ReconcilerError::NotFound`] when the remote store has no such
    /// bundle, or any describe failure.
    pub async fn pull_secret(&self, spec: &ResourceSpec) -> Result<SecretBundle, ReconcilerError> {
        let key = spec.key();
        let _guard = self.lock_identity(&key).await;
        let bundle = self
            .fetch_secret(spec)
            .await?
            .ok_or(ReconcilerError::NotFound { key: key.clone() })?;
        info!(
            "Pulled {} ({} entries, digest {})",
            key,
            bundle.len(),
            bundle.digest()
        );
        Ok(bundle)
    }

    pub(crate) async fn reconcile_secret(
        &self,
        spec: &ResourceSpec,
    ) -> Result<ResourceState, ReconcilerError> {
        let key = spec.key();
        let desired = spec
            .desired_bundle
            .as_ref()
            .ok_or_else(|| ReconcilerError::InvalidSpec {
                key: key.clone(),
                message: "no desired entries (declare a localStore)".to_string(),
            })?;
        let commands = self.kind_commands(&key)?;
        let desired_digest = desired.digest();

        let current = self.fetch_secret(spec).await?;
        let (action, args) = match &current {
            Some(remote) if remote.digest() == desired_digest => {
                debug!("{} already holds digest {}", key, desired_digest);
                return Ok(secret_state(spec, Some(remote)));
            }
            Some(remote) => {
                let state = secret_state(spec, Some(remote));
                let args = commands
                    .update_args(spec, &state, &[])
                    .map_err(invalid_spec(&key))?
                    .ok_or_else(|| ReconcilerError::ImmutableFieldChanged {
                        key: key.clone(),
                        field: "entries".to_string(),
                        declared: desired_digest.clone(),
                        actual: remote.digest(),
                    })?;
                ("update", args)
            }
            None => {
                let args = commands.create_args(spec).map_err(invalid_spec(&key))?;
                ("create", args)
            }
        };

        let payload = secrets::to_remote(desired)?;
        let opts = self.exec_options().stdin(payload.as_bytes().to_vec());
        info!(
            "Writing {} ({}: {} entries, digest {})",
            key,
            action,
            desired.len(),
            desired_digest
        );
        if let Err(err) = self
            .apply(&key, action, &commands.program, &args, &opts, Some(desired))
            .await
        {
            // A bundle created without any readable version reads as absent
            if action != "create" || !already_exists(&err) {
                return Err(err);
            }
            let Some(args) = commands
                .update_args(spec, &secret_state(spec, None), &[])
                .map_err(invalid_spec(&key))?
            else {
                return Err(err);
            };
            warn!("{} exists without a readable version, adding one", key);
            self.apply(&key, "update", &commands.program, &args, &opts, Some(desired))
                .await?;
        }

        // Confirm by reading back what the store now serves
        match self.fetch_secret(spec).await? {
            Some(remote) if remote.digest() == desired_digest => {
                metrics::increment_secret_entries_synced(desired.len());
                Ok(secret_state(spec, Some(&remote)))
            }
            other => Err(ReconcilerError::ExternalCommandFailed {
                key,
                action: "confirm",
                program: commands.program.clone(),
                exit_code: None,
                message: match other {
                    Some(remote) => format!(
                        "remote digest {} does not match written digest {}",
                        remote.digest(),
                        desired_digest
                    ),
                    None => "bundle missing after write".to_string(),
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resource::ResourceKind;

    #[test]
    fn test_secret_state_reports_count_and_digest_only() {
        let bundle = SecretBundle::from_entries(
            "app",
            vec![("DB_PASS".to_string(), "hunter2".to_string())],
        );
        let spec = ResourceSpec::secret_bundle("app", bundle.clone());
        let state = secret_state(&spec, Some(&bundle));
        assert_eq!(state.status, ResourceStatus::Ready);
        assert_eq!(state.attribute("entries"), Some("1"));
        assert_eq!(state.attribute("digest"), Some(bundle.digest().as_str()));
        let rendered = serde_json::to_string(&state).expect("state should serialize");
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_already_exists_is_recognised() {
        let failed = |message: &str| ReconcilerError::ExternalCommandFailed {
            key: ResourceSpec::new(ResourceKind::SecretBundle, "app").key(),
            action: "create",
            program: "gcloud".to_string(),
            exit_code: Some(1),
            message: message.to_string(),
        };
        assert!(already_exists(&failed(
            "ERROR: (gcloud.secrets.create) ALREADY_EXISTS: Secret [app] already exists."
        )));
        assert!(!already_exists(&failed("ERROR: PERMISSION_DENIED")));
    }

    #[test]
    fn test_missing_bundle_is_absent() {
        let spec = ResourceSpec::new(ResourceKind::SecretBundle, "app");
        assert_eq!(secret_state(&spec, None).status, ResourceStatus::Absent);
    }
}
