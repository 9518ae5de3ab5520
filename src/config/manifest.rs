//! # Resource Manifest
//!
//! YAML document declaring the resources to reconcile, the reload hooks their
//! certificates feed, and optional per-kind command overrides.
//!
//! ```yaml
//! resources:
//!   - kind: VM
//!     name: w1
//!     parameters: { cores: 2, memory: 2GB, zone: europe-west1-b }
//!   - kind: SecretBundle
//!     name: app-secrets
//!     localStore: app.env
//!   - kind: Certificate
//!     name: edge
//!     parameters:
//!       common_name: edge.local
//!       subject_alt_names: edge.local,10.0.0.5
//!       deploy_dir: /etc/nginx/tls
//!       reload_hooks: nginx
//! hooks:
//!   - name: nginx
//!     validate: [nginx, -t]
//!     reload: [nginx, -s, reload]
//! ```

use crate::controller::certificates::ReloadHook;
use crate::controller::reconciler::KindCommands;
use crate::controller::resource::{ResourceKind, ResourceSpec};
use crate::controller::secrets::from_local_store;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    #[serde(default)]
    pub hooks: Vec<ReloadHook>,
    #[serde(default)]
    pub kinds: BTreeMap<ResourceKind, KindCommands>,
    /// Directory relative paths resolve against; set by [`Manifest::load`]
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// One declared resource as written in YAML
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDecl {
    pub kind: ResourceKind,
    pub name: String,
    /// Scalars of any YAML type; rendered to strings
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,
    /// `KEY=VALUE` file holding a SecretBundle's desired contents
    #[serde(default)]
    pub local_store: Option<PathBuf>,
}

impl Manifest {
    /// Read and validate a manifest file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// declares the same `(kind, name)` twice.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let mut manifest = Self::from_yaml(&content)
            .with_context(|| format!("Invalid manifest: {}", path.display()))?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    /// Parse and validate manifest YAML
    ///
    /// # Errors
    ///
    /// Returns an error for invalid YAML, duplicate identities or duplicate
    /// hook names.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_yaml::from_str(content).context("Failed to parse manifest YAML")?;

        let mut seen = BTreeSet::new();
        for decl in &manifest.resources {
            if decl.name.trim().is_empty() {
                bail!("{} resource with an empty name", decl.kind);
            }
            if !seen.insert((decl.kind, decl.name.as_str())) {
                bail!("{}/{} is declared more than once", decl.kind, decl.name);
            }
        }
        let mut hook_names = BTreeSet::new();
        for hook in &manifest.hooks {
            if !hook_names.insert(hook.name.as_str()) {
                bail!("reload hook '{}' is declared more than once", hook.name);
            }
        }

        debug!(
            "Manifest declares {} resource(s), {} hook(s), {} kind override(s)",
            manifest.resources.len(),
            manifest.hooks.len(),
            manifest.kinds.len()
        );
        Ok(manifest)
    }

    /// Declarations whose name matches `name`, or all of them
    #[must_use]
    pub fn select(&self, name: Option<&str>) -> Vec<&ResourceDecl> {
        self.resources
            .iter()
            .filter(|decl| name.map_or(true, |n| decl.name == n))
            .collect()
    }

    /// Build the spec for one declaration
    ///
    /// A SecretBundle's `localStore` is read here; a relative path resolves
    /// against the manifest directory.
    ///
    /// # Errors
    ///
    /// Returns an error for non-scalar parameters, an unreadable or malformed
    /// local store, or a SecretBundle without one when `require_bundle` is set.
    pub fn spec_for(&self, decl: &ResourceDecl, require_bundle: bool) -> Result<ResourceSpec> {
        let mut spec = ResourceSpec::new(decl.kind, decl.name.clone());
        for (key, value) in &decl.parameters {
            let rendered = scalar_to_string(value).with_context(|| {
                format!("{}/{}: parameter '{key}' must be a scalar", decl.kind, decl.name)
            })?;
            spec.parameters.insert(key.clone(), rendered);
        }

        if decl.kind == ResourceKind::SecretBundle {
            match &decl.local_store {
                Some(store) => {
                    let path = self.base_dir.join(store);
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read: {}", path.display()))?;
                    let bundle = from_local_store(&decl.name, content.lines())
                        .with_context(|| format!("Invalid local store: {}", path.display()))?;
                    spec.desired_bundle = Some(bundle);
                }
                None if require_bundle => {
                    bail!("{}/{} needs a localStore", decl.kind, decl.name);
                }
                None => {}
            }
        }
        Ok(spec)
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
