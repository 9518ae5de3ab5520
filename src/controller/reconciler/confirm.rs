//! # Confirmation Poll
//!
//! After a create, update or delete the control plane needs time to settle.
//! The poll re-describes with exponential backoff until the resource reaches
//! the target, the maximum wait elapses, or cancellation fires. Neither a
//! timeout nor a cancellation touches the external resource.

use super::cancel::CancellationSignal;
use super::error::ReconcilerError;
use super::types::Reconciler;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::resource::{ResourceSpec, ResourceState, ResourceStatus};
use tokio::time::Instant;
use tracing::debug;

/// What the poll waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settled {
    /// `Ready`, or `Degraded` which no amount of waiting fixes
    Ready,
    Absent,
}

impl Settled {
    fn reached(self, status: ResourceStatus) -> bool {
        match self {
            Settled::Ready => matches!(status, ResourceStatus::Ready | ResourceStatus::Degraded),
            Settled::Absent => status == ResourceStatus::Absent,
        }
    }

    fn operation(self) -> &'static str {
        match self {
            Settled::Ready => "readiness confirmation",
            Settled::Absent => "deletion confirmation",
        }
    }
}

impl Reconciler {
    /// Poll `spec`'s resource until it reaches `target`
    ///
    /// # Errors
    ///
    /// [`ReconcilerError::ProvisioningTimeout`] once `provisioning_max_wait`
    /// elapses, [`ReconcilerError::Cancelled`] as soon as `cancel` fires, or
    /// any describe failure.
    pub(crate) async fn wait_until(
        &self,
        spec: &ResourceSpec,
        target: Settled,
        cancel: &CancellationSignal,
    ) -> Result<ResourceState, ReconcilerError> {
        let key = spec.key();
        let started = Instant::now();
        let deadline = started + self.config.provisioning_max_wait();
        let mut backoff = ExponentialBackoff::new(self.config.poll_initial(), self.config.poll_max());
        let cancelled = || ReconcilerError::Cancelled {
            key: key.clone(),
            operation: target.operation(),
        };

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            let state = self.observe(spec).await?;
            if target.reached(state.status) {
                debug!(
                    "{} reached {} after {} poll(s)",
                    key,
                    state.status,
                    backoff.attempts() + 1
                );
                return Ok(state);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ReconcilerError::ProvisioningTimeout {
                    key: key.clone(),
                    waited: now - started,
                    last_status: state.status,
                });
            }
            let delay = backoff.next_backoff().min(deadline - now);
            debug!(
                "{} is {}, polling again in {}ms",
                key,
                state.status,
                delay.as_millis()
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(cancelled()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_settles_a_readiness_wait() {
        assert!(Settled::Ready.reached(ResourceStatus::Ready));
        assert!(Settled::Ready.reached(ResourceStatus::Degraded));
        assert!(!Settled::Ready.reached(ResourceStatus::Creating));
        assert!(!Settled::Ready.reached(ResourceStatus::Absent));
    }

    #[test]
    fn test_only_absent_settles_a_deletion_wait() {
        assert!(Settled::Absent.reached(ResourceStatus::Absent));
        assert!(!Settled::Absent.reached(ResourceStatus::Deleting));
        assert!(!Settled::Absent.reached(ResourceStatus::Ready));
    }
}
