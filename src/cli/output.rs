//! # Output
//!
//! JSON reports printed on stdout.

use anyhow::{bail, Result};
use infra_reconciler::{ReconcilerError, ResourceKey};
use serde::Serialize;

/// Why a resource failed
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub reason: &'static str,
    pub message: String,
    pub transient: bool,
    pub remediation: String,
}

impl From<&ReconcilerError> for ErrorReport {
    fn from(e: &ReconcilerError) -> Self {
        Self {
            reason: e.as_str(),
            message: e.to_string(),
            transient: e.is_transient(),
            remediation: e.remediation(),
        }
    }
}

/// Outcome for one resource
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReport<T: Serialize> {
    pub kind: String,
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl<T: Serialize> ResourceReport<T> {
    pub fn new(key: &ResourceKey, result: &Result<T, ReconcilerError>) -> Self
    where
        T: Clone,
    {
        match result {
            Ok(value) => Self {
                kind: key.kind.to_string(),
                name: key.name.clone(),
                ok: true,
                result: Some(value.clone()),
                error: None,
            },
            Err(e) => Self {
                kind: key.kind.to_string(),
                name: key.name.clone(),
                ok: false,
                result: None,
                error: Some(ErrorReport::from(e)),
            },
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print every report and fail when any resource failed
pub fn print_reports<T: Serialize>(reports: &[ResourceReport<T>], verb: &str) -> Result<()> {
    print_json(reports)?;
    let failed = reports.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        bail!("{failed} of {} resource(s) failed to {verb}", reports.len());
    }
    Ok(())
}
