//! # Resource Model
//!
//! Declared (`ResourceSpec`) and observed (`ResourceState`) value objects passed
//! between the executor, parser and reconciler. Nothing here is cached across
//! reconciliation passes; the external control plane is the source of truth.

use crate::controller::secrets::SecretBundle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of infrastructure object managed by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Compute instance provisioned through the cloud CLI
    #[serde(rename = "VM", alias = "vm", alias = "Vm")]
    Vm,
    /// CA + leaf TLS chain minted through the PKI toolkit
    #[serde(alias = "certificate")]
    Certificate,
    /// Named set of secret key/value entries held by the remote secret store
    #[serde(alias = "secretBundle", alias = "secret-bundle")]
    SecretBundle,
}

impl ResourceKind {
    /// Stable lowercase label used in logs, metrics and identity keys
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "vm",
            ResourceKind::Certificate => "certificate",
            ResourceKind::SecretBundle => "secret-bundle",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resource: `name` is unique per `kind`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub name: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Declared resource
///
/// Re-declaring the same `name` with different `parameters` is an update, never
/// a second create. A `SecretBundle` spec carries its desired entries in
/// `desired_bundle`; those values never reach `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub name: String,
    pub parameters: BTreeMap<String, String>,
    pub desired_bundle: Option<SecretBundle>,
}

impl ResourceSpec {
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            parameters: BTreeMap::new(),
            desired_bundle: None,
        }
    }

    /// Builder-style parameter insertion
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Spec for pushing `bundle` to the remote secret store under `name`
    #[must_use]
    pub fn secret_bundle(name: impl Into<String>, bundle: SecretBundle) -> Self {
        let mut spec = Self::new(ResourceKind::SecretBundle, name);
        spec.desired_bundle = Some(bundle);
        spec
    }

    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

impl fmt::Debug for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSpec")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field(
                "desired_bundle",
                &self.desired_bundle.as_ref().map(SecretBundle::len),
            )
            .finish()
    }
}

/// Lifecycle status reported for a resource
///
/// `Absent → Creating → Ready → Deleting → Absent`; `Degraded` is entered from
/// `Ready` when a health check fails and only leaves it through a fresh confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Absent,
    Creating,
    Ready,
    Degraded,
    Deleting,
}

impl ResourceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Absent => "Absent",
            ResourceStatus::Creating => "Creating",
            ResourceStatus::Ready => "Ready",
            ResourceStatus::Degraded => "Degraded",
            ResourceStatus::Deleting => "Deleting",
        }
    }

    /// Whether an external object exists for this status
    #[must_use]
    pub fn exists(&self) -> bool {
        !matches!(self, ResourceStatus::Absent)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed resource, owned by the reconciler for one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub name: String,
    /// Assigned by the control plane; never invented locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub status: ResourceStatus,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ResourceState {
    /// State for a resource with no external object
    #[must_use]
    pub fn absent(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            external_id: None,
            status: ResourceStatus::Absent,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
