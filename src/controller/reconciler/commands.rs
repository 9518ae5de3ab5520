//! # Kind Commands
//!
//! How one resource kind maps onto an external CLI: the program, argv
//! templates for each lifecycle verb, and how declared parameters become
//! flags.
//!
//! ## Placeholders
//!
//! - `{name}` - the resource name
//! - `{param:KEY}` - a declared parameter (missing is an error)
//! - `{attr:KEY}` - an attribute of the described state (missing is an error)
//!
//! Parameters not consumed by a placeholder are passed as `--key=value`
//! flags on create, and only the changed ones on update. A flag mapped to an
//! empty string is not passed at all. Scope parameters (zone, project) are
//! appended to every verb.

use super::diff::FieldChange;
use crate::controller::resource::{ResourceKind, ResourceSpec, ResourceState};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(name|param:[A-Za-z0-9_.\-]+|attr:[A-Za-z0-9_.\-]+)\}")
        .expect("Failed to compile placeholder regex - this should never happen")
});

/// Argv templates and flag mapping for one resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindCommands {
    pub program: String,
    pub describe: Vec<String>,
    pub create: Vec<String>,
    /// No update command means every change needs a re-create
    #[serde(default)]
    pub update: Option<Vec<String>>,
    pub delete: Vec<String>,
    /// Full argv (program first); run after create and update
    #[serde(default)]
    pub health_check: Option<Vec<String>>,
    /// Parameter name to create flag; default `--<name>`
    #[serde(default)]
    pub parameter_flags: BTreeMap<String, String>,
    /// Parameter name to update flag; falls back to `parameter_flags`
    #[serde(default)]
    pub update_flags: BTreeMap<String, String>,
    /// Parameters passed to every verb and never diffed
    #[serde(default)]
    pub scope_parameters: BTreeSet<String>,
    /// Parameter name to the described attribute it is compared against
    #[serde(default)]
    pub attribute_keys: BTreeMap<String, String>,
    /// Parameters the update command can change in place
    #[serde(default)]
    pub mutable_fields: BTreeSet<String>,
    /// Attribute holding a machine type that `cores` and `memory` are read
    /// back from (`custom-<cpu>-<mb>`)
    #[serde(default)]
    pub sizing_attribute: Option<String>,
}

fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl KindCommands {
    /// Built-in commands for `kind`; certificates are not CLI-driven
    #[must_use]
    pub fn defaults_for(kind: ResourceKind) -> Option<Self> {
        match kind {
            ResourceKind::Vm => Some(Self::vm_defaults()),
            ResourceKind::SecretBundle => Some(Self::secret_bundle_defaults()),
            ResourceKind::Certificate => None,
        }
    }

    /// `gcloud compute instances`
    #[must_use]
    pub fn vm_defaults() -> Self {
        Self {
            program: "gcloud".to_string(),
            describe: argv(&["compute", "instances", "describe", "{name}", "--format=json"]),
            create: argv(&["compute", "instances", "create", "{name}", "--format=json"]),
            update: Some(argv(&[
                "compute",
                "instances",
                "update",
                "{name}",
                "--format=json",
            ])),
            delete: argv(&["compute", "instances", "delete", "{name}", "--quiet"]),
            health_check: None,
            parameter_flags: mapping(&[
                ("cores", "--custom-cpu"),
                ("memory", "--custom-memory"),
                ("labels", "--labels"),
            ]),
            update_flags: mapping(&[("labels", "--update-labels")]),
            scope_parameters: set(&["zone", "project"]),
            attribute_keys: mapping(&[
                ("machine-type", "machineType"),
                ("min-cpu-platform", "minCpuPlatform"),
                ("deletion-protection", "deletionProtection"),
                ("labels", "labels"),
            ]),
            mutable_fields: set(&["labels", "min-cpu-platform", "deletion-protection"]),
            sizing_attribute: Some("machineType".to_string()),
        }
    }

    /// `gcloud secrets`; the payload travels on stdin
    #[must_use]
    pub fn secret_bundle_defaults() -> Self {
        Self {
            program: "gcloud".to_string(),
            describe: argv(&[
                "secrets",
                "versions",
                "access",
                "latest",
                "--secret={name}",
            ]),
            create: argv(&["secrets", "create", "{name}", "--data-file=-"]),
            update: Some(argv(&["secrets", "versions", "add", "{name}", "--data-file=-"])),
            delete: argv(&["secrets", "delete", "{name}", "--quiet"]),
            health_check: None,
            parameter_flags: BTreeMap::new(),
            update_flags: BTreeMap::new(),
            scope_parameters: set(&["project"]),
            attribute_keys: BTreeMap::new(),
            mutable_fields: BTreeSet::new(),
            sizing_attribute: None,
        }
    }

    /// Attribute a parameter is compared against
    #[must_use]
    pub fn attribute_key<'a>(&'a self, field: &'a str) -> &'a str {
        self.attribute_keys
            .get(field)
            .map_or(field, String::as_str)
    }

    #[must_use]
    pub fn is_mutable(&self, field: &str) -> bool {
        self.mutable_fields.contains(field)
    }

    #[must_use]
    pub fn is_scope(&self, field: &str) -> bool {
        self.scope_parameters.contains(field)
    }

    /// # Errors
    ///
    /// Returns a message naming an unresolvable placeholder.
    pub fn describe_args(&self, spec: &ResourceSpec) -> Result<Vec<String>, String> {
        let mut args = render(&self.describe, spec, None)?;
        args.extend(self.scope_args(spec));
        Ok(args)
    }

    /// Create argv with every declared, non-scope parameter as a flag
    ///
    /// # Errors
    ///
    /// Returns a message naming an unresolvable placeholder.
    pub fn create_args(&self, spec: &ResourceSpec) -> Result<Vec<String>, String> {
        let mut args = render(&self.create, spec, None)?;
        let consumed = consumed_parameters(&self.create);
        for (key, value) in &spec.parameters {
            if self.is_scope(key) || consumed.contains(key.as_str()) {
                continue;
            }
            if let Some(flag) = flag_arg(self.parameter_flags.get(key), key, value) {
                args.push(flag);
            }
        }
        args.extend(self.scope_args(spec));
        Ok(args)
    }

    /// Update argv carrying only the changed fields, or `None` when the kind
    /// has no update command
    ///
    /// # Errors
    ///
    /// Returns a message naming an unresolvable placeholder.
    pub fn update_args(
        &self,
        spec: &ResourceSpec,
        state: &ResourceState,
        changes: &[FieldChange],
    ) -> Result<Option<Vec<String>>, String> {
        let Some(template) = &self.update else {
            return Ok(None);
        };
        let mut args = render(template, spec, Some(state))?;
        for change in changes {
            let flag = self
                .update_flags
                .get(&change.field)
                .or_else(|| self.parameter_flags.get(&change.field));
            if let Some(flag) = flag_arg(flag, &change.field, &change.declared) {
                args.push(flag);
            }
        }
        args.extend(self.scope_args(spec));
        Ok(Some(args))
    }

    /// # Errors
    ///
    /// Returns a message naming an unresolvable placeholder.
    pub fn delete_args(
        &self,
        spec: &ResourceSpec,
        state: &ResourceState,
    ) -> Result<Vec<String>, String> {
        let mut args = render(&self.delete, spec, Some(state))?;
        args.extend(self.scope_args(spec));
        Ok(args)
    }

    /// Health check as `(program, args)`, if the kind defines one
    ///
    /// # Errors
    ///
    /// Returns a message naming an unresolvable placeholder or an empty argv.
    pub fn health_check_args(
        &self,
        spec: &ResourceSpec,
        state: &ResourceState,
    ) -> Result<Option<(String, Vec<String>)>, String> {
        let Some(template) = &self.health_check else {
            return Ok(None);
        };
        let mut rendered = render(template, spec, Some(state))?;
        if rendered.is_empty() {
            return Err("health check command is empty".to_string());
        }
        let program = rendered.remove(0);
        Ok(Some((program, rendered)))
    }

    fn scope_args(&self, spec: &ResourceSpec) -> Vec<String> {
        self.scope_parameters
            .iter()
            .filter_map(|key| {
                let value = spec.parameter(key)?;
                flag_arg(self.parameter_flags.get(key), key, value)
            })
            .collect()
    }
}

/// `--flag=value`, or `None` for a flag mapped to the empty string
fn flag_arg(flag: Option<&String>, key: &str, value: &str) -> Option<String> {
    match flag {
        Some(flag) if flag.is_empty() => None,
        Some(flag) => Some(format!("{flag}={value}")),
        None => Some(format!("--{key}={value}")),
    }
}

fn consumed_parameters(template: &[String]) -> BTreeSet<&str> {
    template
        .iter()
        .flat_map(|arg| PLACEHOLDER.captures_iter(arg))
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().strip_prefix("param:"))
        .collect()
}

/// Substitute placeholders in every argument of `template`
///
/// # Errors
///
/// Returns a message naming the first placeholder with no value.
pub fn render(
    template: &[String],
    spec: &ResourceSpec,
    state: Option<&ResourceState>,
) -> Result<Vec<String>, String> {
    template
        .iter()
        .map(|arg| render_one(arg, spec, state))
        .collect()
}

fn render_one(
    arg: &str,
    spec: &ResourceSpec,
    state: Option<&ResourceState>,
) -> Result<String, String> {
    let mut out = String::with_capacity(arg.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(arg) {
        let (Some(whole), Some(token)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&arg[last..whole.start()]);
        let token = token.as_str();
        let value = if token == "name" {
            Some(spec.name.as_str())
        } else if let Some(key) = token.strip_prefix("param:") {
            spec.parameter(key)
        } else if let Some(key) = token.strip_prefix("attr:") {
            state.and_then(|s| s.attribute(key))
        } else {
            None
        };
        match value {
            Some(value) => out.push_str(value),
            None => return Err(format!("no value for placeholder {{{token}}}")),
        }
        last = whole.end();
    }
    out.push_str(&arg[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resource::ResourceStatus;

    fn w1() -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Vm, "w1")
            .with_parameter("cores", "2")
            .with_parameter("memory", "2GB")
            .with_parameter("zone", "europe-west1-b")
    }

    #[test]
    fn test_vm_create_args_map_parameters_to_flags() {
        let args = KindCommands::vm_defaults()
            .create_args(&w1())
            .expect("should render");
        assert_eq!(
            args,
            vec![
                "compute",
                "instances",
                "create",
                "w1",
                "--format=json",
                "--custom-cpu=2",
                "--custom-memory=2GB",
                "--zone=europe-west1-b",
            ]
        );
    }

    #[test]
    fn test_describe_carries_scope_only() {
        let args = KindCommands::vm_defaults()
            .describe_args(&w1())
            .expect("should render");
        assert_eq!(args.last().map(String::as_str), Some("--zone=europe-west1-b"));
        assert!(!args.iter().any(|a| a.starts_with("--custom-cpu")));
    }

    #[test]
    fn test_update_passes_only_changed_fields() {
        let commands = KindCommands::vm_defaults();
        let spec = w1().with_parameter("labels", "env=prod");
        let state = ResourceState::absent(ResourceKind::Vm, "w1");
        let changes = vec![FieldChange {
            field: "labels".to_string(),
            declared: "env=prod".to_string(),
            actual: Some("env=dev".to_string()),
        }];
        let args = commands
            .update_args(&spec, &state, &changes)
            .expect("should render")
            .expect("vm has an update command");
        assert!(args.contains(&"--update-labels=env=prod".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--custom-cpu")));
    }

    #[test]
    fn test_placeholders_and_empty_flag() {
        let mut commands = KindCommands::vm_defaults();
        commands.create = vec![
            "create".to_string(),
            "{name}".to_string(),
            "--image={param:image}".to_string(),
        ];
        commands.parameter_flags.insert("memory".to_string(), String::new());
        let spec = w1().with_parameter("image", "debian-12");
        let args = commands.create_args(&spec).expect("should render");
        assert_eq!(
            args,
            vec!["create", "w1", "--image=debian-12", "--custom-cpu=2", "--zone=europe-west1-b"]
        );
    }

    #[test]
    fn test_attribute_placeholder_requires_state() {
        let mut commands = KindCommands::vm_defaults();
        commands.health_check = Some(vec![
            "curl".to_string(),
            "-fsS".to_string(),
            "http://{attr:networkInterfaces.0.networkIP}/healthz".to_string(),
        ]);
        let mut state = ResourceState::absent(ResourceKind::Vm, "w1");
        state.status = ResourceStatus::Ready;
        assert!(commands.health_check_args(&w1(), &state).is_err());

        state
            .attributes
            .insert("networkInterfaces.0.networkIP".to_string(), "10.0.0.7".to_string());
        let (program, args) = commands
            .health_check_args(&w1(), &state)
            .expect("should render")
            .expect("health check defined");
        assert_eq!(program, "curl");
        assert_eq!(args[1], "http://10.0.0.7/healthz");
    }

    #[test]
    fn test_missing_param_placeholder_is_error() {
        let err = render(&["{param:image}".to_string()], &w1(), None).expect_err("must fail");
        assert!(err.contains("param:image"));
    }

    #[test]
    fn test_kind_commands_deserialize_with_defaults() {
        let yaml = "program: gcloud\ndescribe: [d, '{name}']\ncreate: [c]\ndelete: [x]\n";
        let commands: KindCommands = serde_yaml::from_str(yaml).expect("should parse");
        assert!(commands.update.is_none());
        assert!(commands.mutable_fields.is_empty());
        assert!(KindCommands::defaults_for(ResourceKind::Certificate).is_none());
    }
}
