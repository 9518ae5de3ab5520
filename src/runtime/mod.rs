//! # Runtime
//!
//! Start-up of the `infractl` process.

pub mod initialization;

pub use initialization::{build_reconciler, init_tracing, initialize, InitializationResult};
