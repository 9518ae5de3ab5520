//! Infra Reconciler Library
//!
//! Drives declared resources (VMs, TLS certificate chains, secret bundles)
//! to their desired state through external command-line tools.
//! Tests are included in the module files and under `tests/`.

pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod runtime;

pub use config::{Manifest, ReconcilerConfig};
pub use controller::reconciler::{Reconciler, ReconcilerError};
pub use controller::resource::{ResourceKey, ResourceKind, ResourceSpec, ResourceState, ResourceStatus};
