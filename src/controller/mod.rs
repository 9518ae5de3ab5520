//! # Controller
//!
//! Core modules of the reconciler.
//!
//! - `backoff`: Exponential backoff for confirmation polls
//! - `certificates`: CA, leaf issuance, rotation and deploy via `openssl`
//! - `executor`: Bounded external process execution and outcome classification
//! - `parser`: JSON describe-output parsing
//! - `reconciler`: Describe, diff, apply and confirm
//! - `resource`: Resource identity, spec and observed state
//! - `secrets`: Secret bundles, local store files and remote sync

pub mod backoff;
pub mod certificates;
pub mod executor;
pub mod parser;
pub mod reconciler;
pub mod resource;
pub mod secrets;
