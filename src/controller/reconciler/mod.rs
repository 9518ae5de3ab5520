//! # Reconciler
//!
//! Top-level driver: describe, diff, apply, confirm.
//!
//! The reconciler:
//! - Describes each declared resource through its kind's CLI
//! - Creates, updates in place or refuses (immutable change) as needed
//! - Confirms the result with a bounded exponential-backoff poll
//! - Hands certificates to the certificate pipeline and secret bundles to
//!   the digest-based secret flow
//!
//! ## Concurrency
//!
//! Calls for the same `(kind, name)` are serialised by a per-identity async
//! mutex; `reconcile_all` runs distinct identities in parallel up to
//! `MAX_CONCURRENT_RECONCILIATIONS`. Long waits observe a
//! [`CancellationSignal`].

pub mod cancel;
pub mod certificate;
pub mod commands;
pub mod confirm;
pub mod destroy;
pub mod diff;
pub mod error;
pub mod plan;
pub mod reconcile;
pub mod secret;
pub mod types;

// Re-export public API
pub use cancel::{cancellation, CancellationHandle, CancellationSignal};
pub use certificate::LeafAction;
pub use commands::KindCommands;
pub use diff::FieldChange;
pub use error::ReconcilerError;
pub use plan::{Plan, PlannedAction};
pub use types::Reconciler;
