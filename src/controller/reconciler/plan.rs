//! # Plan
//!
//! Read-only preview of what `reconcile` would do. Only describe-style
//! commands run and nothing in the certificate store is written.

use super::certificate::LeafAction;
use super::commands::KindCommands;
use super::diff::{diff, FieldChange};
use super::error::ReconcilerError;
use super::types::Reconciler;
use crate::controller::resource::{ResourceKind, ResourceSpec, ResourceState, ResourceStatus};
use serde::Serialize;

/// Action `reconcile` would take
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PlannedAction {
    Noop,
    Create,
    /// Changed fields, all of them mutable in place
    Update { changes: Vec<FieldChange> },
    /// A changed field can only be applied by destroying first
    Blocked { change: FieldChange },
    WaitForReady,
    /// The resource is being deleted; it will be re-created afterwards
    WaitForDeletion,
    /// Replace the remote bundle; values are not shown
    UpdatePayload { entries: usize },
    Certificate { leaf: LeafAction, deploy: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub current: ResourceState,
    #[serde(flatten)]
    pub action: PlannedAction,
}

impl Plan {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(
            self.action,
            PlannedAction::Noop
                | PlannedAction::Certificate {
                    leaf: LeafAction::Keep,
                    deploy: false
                }
        )
    }
}

/// Plan for a described resource
pub(crate) fn plan_described(
    spec: &ResourceSpec,
    current: &ResourceState,
    commands: &KindCommands,
) -> PlannedAction {
    match current.status {
        ResourceStatus::Absent => PlannedAction::Create,
        ResourceStatus::Creating => PlannedAction::WaitForReady,
        ResourceStatus::Deleting => PlannedAction::WaitForDeletion,
        ResourceStatus::Ready | ResourceStatus::Degraded => {
            let changes = diff(spec, current, commands);
            if changes.is_empty() {
                return PlannedAction::Noop;
            }
            let blocked = changes
                .iter()
                .find(|c| !commands.is_mutable(&c.field) || commands.update.is_none());
            match blocked {
                Some(change) => PlannedAction::Blocked {
                    change: change.clone(),
                },
                None => PlannedAction::Update { changes },
            }
        }
    }
}

impl Reconciler {
    /// Preview the action `reconcile(spec)` would take
    ///
    /// # Errors
    ///
    /// Describe failures and invalid specs.
    pub async fn plan(&self, spec: &ResourceSpec) -> Result<Plan, ReconcilerError> {
        match spec.kind {
            ResourceKind::Certificate => {
                let (current, leaf, deploy) = self.certificate_plan(spec).await?;
                Ok(Plan {
                    current,
                    action: PlannedAction::Certificate { leaf, deploy },
                })
            }
            ResourceKind::SecretBundle => {
                let remote = self.fetch_secret(spec).await?;
                let current = super::secret::secret_state(spec, remote.as_ref());
                let action = match (&spec.desired_bundle, &remote) {
                    (None, _) => PlannedAction::Noop,
                    (Some(_), None) => PlannedAction::Create,
                    (Some(desired), Some(remote)) if desired.digest() == remote.digest() => {
                        PlannedAction::Noop
                    }
                    (Some(desired), Some(_)) => PlannedAction::UpdatePayload {
                        entries: desired.len(),
                    },
                };
                Ok(Plan { current, action })
            }
            ResourceKind::Vm => {
                let commands = self.kind_commands(&spec.key())?;
                let current = self.describe(spec).await?;
                let action = plan_described(spec, &current, commands);
                Ok(Plan { current, action })
            }
        }
    }
}
