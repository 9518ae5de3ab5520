//! # Reconciliation Logic
//!
//! Drives one declared resource towards its spec:
//!
//! 1. Describe by name (absence is `Absent`, not an error)
//! 2. `Absent` → create, then confirm `Ready` with a bounded poll
//! 3. `Ready` with equal parameters → nothing to do, describe only
//! 4. `Ready` with changed parameters → update in place when every changed
//!    field is mutable, otherwise [`ReconcilerError::ImmutableFieldChanged`]
//!
//! Certificates and secret bundles share the entry point and identity lock
//! but have their own flows (see `certificate.rs` and `secret.rs`).

use super::cancel::CancellationSignal;
use super::commands::KindCommands;
use super::confirm::Settled;
use super::diff::diff;
use super::error::ReconcilerError;
use super::types::Reconciler;
use crate::controller::executor::Outcome;
use crate::controller::parser::{self, MalformedOutputError};
use crate::controller::resource::{
    ResourceKey, ResourceKind, ResourceSpec, ResourceState, ResourceStatus,
};
use crate::observability::metrics;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Build the `InvalidSpec` mapper for placeholder errors on `key`
pub(crate) fn invalid_spec(key: &ResourceKey) -> impl FnOnce(String) -> ReconcilerError + '_ {
    move |message| ReconcilerError::InvalidSpec {
        key: key.clone(),
        message,
    }
}

impl Reconciler {
    /// Converge one resource to `spec` and return its observed state
    ///
    /// Calls for the same `(kind, name)` are serialised; different identities
    /// run in parallel.
    ///
    /// # Errors
    ///
    /// The first failure of the pass; nothing is retried here except one
    /// describe re-parse and the confirmation poll.
    pub async fn reconcile(
        &self,
        spec: &ResourceSpec,
        cancel: &CancellationSignal,
    ) -> Result<ResourceState, ReconcilerError> {
        let key = spec.key();
        let span = info_span!(
            "reconcile",
            resource.kind = spec.kind.as_str(),
            resource.name = %spec.name,
            operation.success = tracing::field::Empty
        );
        let span_clone = span.clone();
        let start = Instant::now();

        let result = async {
            let _guard = self.lock_identity(&key).await;
            if cancel.is_cancelled() {
                return Err(ReconcilerError::Cancelled {
                    key: key.clone(),
                    operation: "reconcile",
                });
            }
            info!("🔄 Reconciling {}", key);
            match spec.kind {
                ResourceKind::Certificate => self.reconcile_certificate(spec).await,
                ResourceKind::SecretBundle => self.reconcile_secret(spec).await,
                ResourceKind::Vm => self.reconcile_described(spec, cancel).await,
            }
        }
        .instrument(span)
        .await;

        span_clone.record("operation.success", result.is_ok());
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.as_str(),
        };
        metrics::increment_reconciliations(spec.kind.as_str(), "reconcile", outcome);
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match &result {
            Ok(state) => info!(
                "✅ {} is {} ({}ms)",
                key,
                state.status,
                start.elapsed().as_millis()
            ),
            Err(e) => error!("❌ Reconciliation of {} failed: {}", key, e),
        }
        result
    }

    /// Reconcile every spec, at most `max_concurrent_reconciliations` at once
    ///
    /// One failure never stops the others; results keep the input order.
    pub async fn reconcile_all(
        &self,
        specs: &[ResourceSpec],
        cancel: &CancellationSignal,
    ) -> Vec<(ResourceKey, Result<ResourceState, ReconcilerError>)> {
        let tasks = specs.iter().map(|spec| async move {
            let result = match self.permits.acquire().await {
                Ok(_permit) => self.reconcile(spec, cancel).await,
                Err(_) => Err(ReconcilerError::Cancelled {
                    key: spec.key(),
                    operation: "reconcile",
                }),
            };
            (spec.key(), result)
        });
        futures::future::join_all(tasks).await
    }

    /// Current state of `spec`'s resource, whatever its kind
    ///
    /// # Errors
    ///
    /// Describe failures; a missing resource is `Absent`, not an error.
    pub(crate) async fn observe(&self, spec: &ResourceSpec) -> Result<ResourceState, ReconcilerError> {
        match spec.kind {
            ResourceKind::Certificate => self.certificate_state(spec).await,
            ResourceKind::SecretBundle => {
                let bundle = self.fetch_secret(spec).await?;
                Ok(super::secret::secret_state(spec, bundle.as_ref()))
            }
            ResourceKind::Vm => self.describe(spec).await,
        }
    }

    /// Describe a CLI-managed resource
    pub(crate) async fn describe(&self, spec: &ResourceSpec) -> Result<ResourceState, ReconcilerError> {
        let found = self
            .describe_with(spec, |raw| {
                parser::parse_resource_state(raw, spec.kind, &spec.name)
            })
            .await?;
        Ok(found.unwrap_or_else(|| ResourceState::absent(spec.kind, &spec.name)))
    }

    /// Run the kind's describe command and decode its output with `parse`
    ///
    /// `None` when the control plane reports the object missing. Output that
    /// fails to parse is fetched and parsed once more before giving up.
    pub(crate) async fn describe_with<T, F>(
        &self,
        spec: &ResourceSpec,
        parse: F,
    ) -> Result<Option<T>, ReconcilerError>
    where
        F: Fn(&str) -> Result<T, MalformedOutputError>,
    {
        let key = spec.key();
        let commands = self.kind_commands(&key)?;
        let args = commands.describe_args(spec).map_err(invalid_spec(&key))?;
        let opts = self.exec_options();

        let mut reparsed = false;
        loop {
            let result = self.executor.run(&commands.program, &args, &opts).await?;
            match self.classifier.classify(&result) {
                Outcome::NotFound => {
                    debug!("{} not found by control plane", key);
                    return Ok(None);
                }
                Outcome::Failed { exit_code, message } => {
                    return Err(ReconcilerError::ExternalCommandFailed {
                        key,
                        action: "describe",
                        program: commands.program.clone(),
                        exit_code,
                        message,
                    });
                }
                Outcome::Succeeded => match parse(&result.stdout) {
                    Ok(parsed) => return Ok(Some(parsed)),
                    Err(e) if !reparsed => {
                        warn!("Describe output for {} unreadable ({}), retrying once", key, e);
                        reparsed = true;
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }

    async fn reconcile_described(
        &self,
        spec: &ResourceSpec,
        cancel: &CancellationSignal,
    ) -> Result<ResourceState, ReconcilerError> {
        let key = spec.key();
        let commands = self.kind_commands(&key)?;

        let mut current = self.describe(spec).await?;
        if current.status == ResourceStatus::Deleting {
            info!("{} is being deleted; waiting before re-creating it", key);
            current = self.wait_until(spec, Settled::Absent, cancel).await?;
        }

        match current.status {
            ResourceStatus::Absent | ResourceStatus::Deleting => {
                let args = commands.create_args(spec).map_err(invalid_spec(&key))?;
                info!("Creating {}", key);
                self.apply(&key, "create", &commands.program, &args, &self.exec_options(), None)
                    .await?;
                let ready = self.wait_until(spec, Settled::Ready, cancel).await?;
                self.health_check(spec, commands, ready).await
            }
            ResourceStatus::Creating => {
                info!("{} is still provisioning; confirming readiness", key);
                let ready = self.wait_until(spec, Settled::Ready, cancel).await?;
                self.health_check(spec, commands, ready).await
            }
            ResourceStatus::Ready | ResourceStatus::Degraded => {
                let changes = diff(spec, &current, commands);
                if changes.is_empty() {
                    debug!("{} matches its spec", key);
                    return Ok(current);
                }

                let blocked = changes.iter().find(|c| !commands.is_mutable(&c.field));
                let update = match blocked {
                    Some(_) => None,
                    None => commands
                        .update_args(spec, &current, &changes)
                        .map_err(invalid_spec(&key))?,
                };
                let Some(args) = update else {
                    let change = blocked.unwrap_or(&changes[0]);
                    return Err(ReconcilerError::ImmutableFieldChanged {
                        key,
                        field: change.field.clone(),
                        declared: change.declared.clone(),
                        actual: change.actual.clone().unwrap_or_default(),
                    });
                };

                info!(
                    "Updating {} in place: {}",
                    key,
                    changes
                        .iter()
                        .map(|c| c.field.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                self.apply(&key, "update", &commands.program, &args, &self.exec_options(), None)
                    .await?;
                let ready = self.wait_until(spec, Settled::Ready, cancel).await?;
                self.health_check(spec, commands, ready).await
            }
        }
    }

    /// Run the kind's health check against a confirmed resource
    ///
    /// A failing check marks the state `Degraded`; it is not an error.
    async fn health_check(
        &self,
        spec: &ResourceSpec,
        commands: &KindCommands,
        mut state: ResourceState,
    ) -> Result<ResourceState, ReconcilerError> {
        let key = spec.key();
        let Some((program, args)) = commands
            .health_check_args(spec, &state)
            .map_err(invalid_spec(&key))?
        else {
            return Ok(state);
        };

        let result = self.executor.run(&program, &args, &self.exec_options()).await?;
        match self.classifier.classify(&result) {
            Outcome::Succeeded => debug!("Health check passed for {}", key),
            outcome => {
                warn!(
                    "Health check for {} failed ({}), marking Degraded",
                    key,
                    outcome.as_str()
                );
                state.status = ResourceStatus::Degraded;
            }
        }
        Ok(state)
    }
}
