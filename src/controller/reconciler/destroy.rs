//! # Destroy
//!
//! `Ready | Degraded → Deleting → Absent`, confirmed by the same poll used
//! for creation. Destroying something already absent is a no-op.

use super::cancel::CancellationSignal;
use super::confirm::Settled;
use super::error::ReconcilerError;
use super::reconcile::invalid_spec;
use super::types::Reconciler;
use crate::controller::resource::{
    ResourceKey, ResourceKind, ResourceSpec, ResourceState, ResourceStatus,
};
use crate::observability::metrics;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};

impl Reconciler {
    /// Remove `spec`'s external object and confirm it is gone
    ///
    /// For a certificate the leaf key is destroyed and the chain marked
    /// revoked; the CA is kept.
    ///
    /// # Errors
    ///
    /// Delete rejections, [`ReconcilerError::ProvisioningTimeout`] when the
    /// object lingers, or [`ReconcilerError::Cancelled`].
    pub async fn destroy(
        &self,
        spec: &ResourceSpec,
        cancel: &CancellationSignal,
    ) -> Result<ResourceState, ReconcilerError> {
        let key = spec.key();
        let span = info_span!(
            "destroy",
            resource.kind = spec.kind.as_str(),
            resource.name = %spec.name
        );
        let start = Instant::now();

        let result = async {
            let _guard = self.lock_identity(&key).await;
            if cancel.is_cancelled() {
                return Err(ReconcilerError::Cancelled {
                    key: key.clone(),
                    operation: "destroy",
                });
            }
            match spec.kind {
                ResourceKind::Certificate => self.destroy_certificate(spec).await,
                ResourceKind::Vm | ResourceKind::SecretBundle => {
                    self.destroy_described(spec, cancel).await
                }
            }
        }
        .instrument(span)
        .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.as_str(),
        };
        metrics::increment_reconciliations(spec.kind.as_str(), "destroy", outcome);
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match &result {
            Ok(_) => info!("🗑️  {} is absent", key),
            Err(e) => error!("❌ Destroy of {} failed: {}", key, e),
        }
        result
    }

    /// Destroy every spec in reverse declaration order, one at a time
    pub async fn destroy_all(
        &self,
        specs: &[ResourceSpec],
        cancel: &CancellationSignal,
    ) -> Vec<(ResourceKey, Result<ResourceState, ReconcilerError>)> {
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs.iter().rev() {
            let result = self.destroy(spec, cancel).await;
            results.push((spec.key(), result));
        }
        results
    }

    async fn destroy_described(
        &self,
        spec: &ResourceSpec,
        cancel: &CancellationSignal,
    ) -> Result<ResourceState, ReconcilerError> {
        let key = spec.key();
        let current = self.observe(spec).await?;
        match current.status {
            ResourceStatus::Absent => {
                info!("{} already absent, nothing to destroy", key);
                return Ok(current);
            }
            ResourceStatus::Deleting => {
                info!("{} is already being deleted; confirming", key);
            }
            ResourceStatus::Creating | ResourceStatus::Ready | ResourceStatus::Degraded => {
                let commands = self.kind_commands(&key)?;
                let args = commands
                    .delete_args(spec, &current)
                    .map_err(invalid_spec(&key))?;
                info!("Deleting {}", key);
                self.apply(&key, "delete", &commands.program, &args, &self.exec_options(), None)
                    .await?;
            }
        }
        self.wait_until(spec, Settled::Absent, cancel).await
    }
}
