//! # Structured Result Parser
//!
//! Decodes control-plane CLI output into typed records:
//!
//! - **Resource documents** (`describe`/`list` output) into [`ResourceState`]
//! - **Secret payloads** (`[{key, value}]`) into [`SecretBundle`]
//! - **Chain metadata** (`<name>.chain.json`) into [`CertificateChain`]
//!
//! The parser is tolerant: absent optional fields become `None`, surrounding
//! log lines are skipped, and list output is searched by name.

pub mod error;
pub mod json;

pub use error::MalformedOutputError;

use crate::controller::certificates::CertificateChain;
use crate::controller::resource::{ResourceKind, ResourceState, ResourceStatus};
use crate::controller::secrets::{self, SecretBundle};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Record the caller expects the raw text to contain
#[derive(Debug, Clone, Copy)]
pub enum SchemaHint<'a> {
    ResourceState { kind: ResourceKind, name: &'a str },
    SecretBundle { name: &'a str },
    CertificateChain,
}

/// Decoded record
#[derive(Debug, Clone)]
pub enum Parsed {
    State(ResourceState),
    Bundle(SecretBundle),
    Chain(CertificateChain),
}

/// Parse `raw` according to `hint`
///
/// # Errors
///
/// Returns [`MalformedOutputError`] when no usable document is found or the
/// document does not fit the requested schema.
pub fn parse(raw: &str, hint: SchemaHint<'_>) -> Result<Parsed, MalformedOutputError> {
    match hint {
        SchemaHint::ResourceState { kind, name } => {
            parse_resource_state(raw, kind, name).map(Parsed::State)
        }
        SchemaHint::SecretBundle { name } => secrets::from_remote(name, raw).map(Parsed::Bundle),
        SchemaHint::CertificateChain => parse_certificate_chain(raw).map(Parsed::Chain),
    }
}

/// Decode `describe` or `list` output for the resource `name`
///
/// Empty output and a list without a matching element both mean the
/// resource is absent.
///
/// # Errors
///
/// Returns [`MalformedOutputError`] when the text holds no JSON document.
pub fn parse_resource_state(
    raw: &str,
    kind: ResourceKind,
    name: &str,
) -> Result<ResourceState, MalformedOutputError> {
    if raw.trim().is_empty() {
        return Ok(ResourceState::absent(kind, name));
    }

    let value = json::locate_json(raw).ok_or_else(|| {
        MalformedOutputError::new("resource state", "no JSON document found", json::snippet(raw))
    })?;

    match value {
        Value::Object(doc) => Ok(state_from_document(&doc, kind, name)),
        Value::Array(items) => {
            let found = items.iter().filter_map(Value::as_object).find(|doc| {
                doc.get("name").and_then(Value::as_str) == Some(name)
            });
            match found {
                Some(doc) => Ok(state_from_document(doc, kind, name)),
                None => {
                    debug!("{} {} not present in list of {}", kind, name, items.len());
                    Ok(ResourceState::absent(kind, name))
                }
            }
        }
        _ => Err(MalformedOutputError::new(
            "resource state",
            "expected a JSON object or list",
            json::snippet(raw),
        )),
    }
}

fn state_from_document(doc: &Map<String, Value>, kind: ResourceKind, name: &str) -> ResourceState {
    let external_id = match doc.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let status = match doc
        .get("status")
        .or_else(|| doc.get("state"))
        .and_then(Value::as_str)
    {
        Some(raw_status) => map_status(raw_status),
        // Secret stores and some describe verbs report no status for live objects
        None => ResourceStatus::Ready,
    };

    let mut attributes = BTreeMap::new();
    for (key, value) in doc {
        if matches!(key.as_str(), "id" | "name" | "status" | "state") {
            continue;
        }
        json::flatten_json_value(value, key.clone(), &mut attributes);
    }

    ResourceState {
        kind,
        name: name.to_string(),
        external_id,
        status,
        attributes,
    }
}

/// Map a control-plane status string onto the lifecycle
///
/// Unknown strings map to `Degraded`: a state we cannot interpret is never
/// treated as healthy.
#[must_use]
pub fn map_status(raw: &str) -> ResourceStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "READY" | "RUNNING" | "ACTIVE" | "ENABLED" | "AVAILABLE" | "HEALTHY" => {
            ResourceStatus::Ready
        }
        "PROVISIONING" | "STAGING" | "CREATING" | "PENDING" | "STARTING" => {
            ResourceStatus::Creating
        }
        "STOPPING" | "DELETING" | "TERMINATING" | "SUSPENDING" => ResourceStatus::Deleting,
        "TERMINATED" | "DELETED" | "DESTROYED" | "ABSENT" => ResourceStatus::Absent,
        "DEGRADED" | "ERROR" | "FAILED" | "UNHEALTHY" | "SUSPENDED" | "REPAIRING" => {
            ResourceStatus::Degraded
        }
        other => {
            warn!("Unrecognised resource status '{}', treating as Degraded", other);
            ResourceStatus::Degraded
        }
    }
}

/// Decode persisted chain metadata
///
/// # Errors
///
/// Returns [`MalformedOutputError`] for missing JSON, schema mismatch, or a
/// chain whose `notAfter` is not after `notBefore`.
pub fn parse_certificate_chain(raw: &str) -> Result<CertificateChain, MalformedOutputError> {
    let value = json::locate_json(raw).ok_or_else(|| {
        MalformedOutputError::new("certificate chain", "no JSON document found", json::snippet(raw))
    })?;
    let chain: CertificateChain = serde_json::from_value(value).map_err(|e| {
        MalformedOutputError::new("certificate chain", e.to_string(), json::snippet(raw))
    })?;
    if chain.not_after <= chain.not_before {
        return Err(MalformedOutputError::new(
            "certificate chain",
            "notAfter must be later than notBefore",
            json::snippet(raw),
        ));
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_document_maps_to_ready_state() {
        let raw = r#"{"id": "8812345", "name": "w1", "status": "RUNNING", "cores": "2", "memory": "2GB", "externalIp": null}"#;
        let state = parse_resource_state(raw, ResourceKind::Vm, "w1").expect("should parse");

        assert_eq!(state.status, ResourceStatus::Ready);
        assert_eq!(state.external_id.as_deref(), Some("8812345"));
        assert_eq!(state.attribute("cores"), Some("2"));
        assert_eq!(state.attribute("externalIp"), None);
        assert_eq!(state.attribute("name"), None);
    }

    #[test]
    fn test_numeric_id_and_state_field() {
        let raw = r#"{"id": 77, "state": "PROVISIONING"}"#;
        let state = parse_resource_state(raw, ResourceKind::Vm, "w1").expect("should parse");
        assert_eq!(state.external_id.as_deref(), Some("77"));
        assert_eq!(state.status, ResourceStatus::Creating);
    }

    #[test]
    fn test_list_output_is_searched_by_name() {
        let raw = r#"[{"name": "w0", "id": "1", "status": "RUNNING"}, {"name": "w1", "id": "2", "status": "STAGING"}]"#;
        let state = parse_resource_state(raw, ResourceKind::Vm, "w1").expect("should parse");
        assert_eq!(state.external_id.as_deref(), Some("2"));
        assert_eq!(state.status, ResourceStatus::Creating);

        let missing = parse_resource_state(raw, ResourceKind::Vm, "w9").expect("should parse");
        assert_eq!(missing.status, ResourceStatus::Absent);
    }

    #[test]
    fn test_empty_output_is_absent() {
        let state = parse_resource_state("  \n", ResourceKind::Vm, "w1").expect("should parse");
        assert_eq!(state, ResourceState::absent(ResourceKind::Vm, "w1"));
    }

    #[test]
    fn test_garbage_output_is_malformed_with_bounded_snippet() {
        let raw = "x".repeat(1000);
        let err = parse_resource_state(&raw, ResourceKind::Vm, "w1").expect_err("must fail");
        assert_eq!(err.expected, "resource state");
        assert!(err.snippet.len() < 200);
    }

    #[test]
    fn test_unknown_status_is_degraded() {
        assert_eq!(map_status("warming-up"), ResourceStatus::Degraded);
        assert_eq!(map_status("running"), ResourceStatus::Ready);
        assert_eq!(map_status("TERMINATED"), ResourceStatus::Absent);
    }

    #[test]
    fn test_parse_dispatches_secret_bundle() {
        let raw = r#"[{"key": "A", "value": "1"}]"#;
        match parse(raw, SchemaHint::SecretBundle { name: "app" }).expect("should parse") {
            Parsed::Bundle(bundle) => assert_eq!(bundle.get("A"), Some("1")),
            other => panic!("expected bundle, got {other:?}"),
        }
    }

    #[test]
    fn test_certificate_chain_with_inverted_validity_is_rejected() {
        let raw = r#"{
            "commonName": "edge.local",
            "subjectAltNames": ["edge.local"],
            "notBefore": "2026-01-01T00:00:00Z",
            "notAfter": "2025-01-01T00:00:00Z",
            "issuerRef": {"id": "00000000-0000-0000-0000-000000000000", "commonName": "Root", "certPath": "/pki/ca.crt", "keyPath": "/pki/ca.key", "notAfter": "2030-01-01T00:00:00Z"},
            "keyMaterial": "/pki/edge.key",
            "certPath": "/pki/edge.crt",
            "validityDays": 365,
            "phase": "Signed"
        }"#;
        let err = parse_certificate_chain(raw).expect_err("inverted validity must fail");
        assert!(err.detail.contains("notAfter"));
    }
}
