//! # Pull / Push
//!
//! Secret bundles are resources of kind `SecretBundle`; moving them to and
//! from the remote store goes through the [`Reconciler`] so the same identity
//! lock, command templates and error taxonomy apply.

use super::SecretBundle;
use crate::controller::reconciler::{CancellationSignal, Reconciler, ReconcilerError};
use crate::controller::resource::{ResourceKind, ResourceSpec, ResourceState};
use std::collections::BTreeMap;

fn bundle_spec(name: &str, scope: &BTreeMap<String, String>) -> ResourceSpec {
    let mut spec = ResourceSpec::new(ResourceKind::SecretBundle, name);
    spec.parameters.clone_from(scope);
    spec
}

/// Fetch the current remote contents of bundle `name`
///
/// `scope` carries the kind's scope parameters (for example `project`).
///
/// # Errors
///
/// Returns [`ReconcilerError::NotFound`] when the remote store has no such
/// bundle, or any executor/parser error from the describe call.
pub async fn pull(
    reconciler: &Reconciler,
    name: &str,
    scope: &BTreeMap<String, String>,
) -> Result<SecretBundle, ReconcilerError> {
    reconciler.pull_secret(&bundle_spec(name, scope)).await
}

/// Converge remote bundle `name` to `bundle`
///
/// A no-op when the remote digest already matches.
///
/// # Errors
///
/// Propagates any [`ReconcilerError`] from the reconciliation.
pub async fn push(
    reconciler: &Reconciler,
    name: &str,
    scope: &BTreeMap<String, String>,
    bundle: SecretBundle,
    cancel: &CancellationSignal,
) -> Result<ResourceState, ReconcilerError> {
    let mut spec = bundle_spec(name, scope);
    spec.desired_bundle = Some(bundle);
    reconciler.reconcile(&spec, cancel).await
}
