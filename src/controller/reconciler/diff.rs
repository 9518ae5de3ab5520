//! # Parameter Drift
//!
//! Compares declared parameters with the attributes of a described resource.
//! A parameter the control plane does not report is not drift: there is
//! nothing to compare against, and re-applying it would never converge.
//!
//! VM sizing is not reported directly. `cores` and `memory` are read back
//! from the machine type (`custom-4-8192` is 4 vCPUs and 8192 MB), and
//! memory compares by size, so `8GB` and `8192MB` are equal.

use super::commands::KindCommands;
use crate::controller::resource::{ResourceSpec, ResourceState};
use serde::Serialize;
use std::collections::BTreeMap;

/// One declared parameter that differs from what was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub declared: String,
    pub actual: Option<String>,
}

/// Every non-scope parameter of `spec` that differs from `state`
#[must_use]
pub fn diff(spec: &ResourceSpec, state: &ResourceState, commands: &KindCommands) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for (field, declared) in &spec.parameters {
        if commands.is_scope(field) {
            continue;
        }
        let attr = commands.attribute_key(field);

        if let Some(declared_map) = parse_map(declared) {
            let actual_map = nested_attributes(state, attr);
            if actual_map.is_empty() {
                continue;
            }
            if declared_map != actual_map {
                changes.push(FieldChange {
                    field: field.clone(),
                    declared: declared.clone(),
                    actual: Some(render_map(&actual_map)),
                });
            }
            continue;
        }

        let actual = match sized_attribute(state, commands, field) {
            Some(derived) => derived,
            None => match state.attribute(attr) {
                Some(actual) => actual.to_string(),
                None => continue,
            },
        };
        let equal = match field.as_str() {
            MEMORY => memory_mb(declared)
                .zip(memory_mb(&actual))
                .map_or_else(|| values_match(declared, &actual), |(d, a)| d == a),
            _ => values_match(declared, &actual),
        };
        if !equal {
            changes.push(FieldChange {
                field: field.clone(),
                declared: declared.clone(),
                actual: Some(actual),
            });
        }
    }
    changes
}

const CORES: &str = "cores";
const MEMORY: &str = "memory";

/// `cores` or `memory` as reported through the kind's sizing attribute
///
/// A machine type that is not custom-sized is reported as is, so declared
/// sizing on a predefined type is a change.
fn sized_attribute(state: &ResourceState, commands: &KindCommands, field: &str) -> Option<String> {
    if field != CORES && field != MEMORY {
        return None;
    }
    let machine_type = state.attribute(commands.sizing_attribute.as_deref()?)?;
    let Some((cpus, mb)) = custom_sizing(machine_type) else {
        return Some(machine_type.rsplit('/').next().unwrap_or(machine_type).to_string());
    };
    Some(if field == CORES {
        cpus.to_string()
    } else {
        format!("{mb}MB")
    })
}

/// vCPUs and memory (MB) of a custom machine type
///
/// Accepts self-links, family prefixes (`n2-custom-4-8192`) and the
/// extended-memory suffix (`custom-2-15360-ext`).
#[must_use]
pub fn custom_sizing(machine_type: &str) -> Option<(u32, u64)> {
    let name = machine_type.rsplit('/').next()?;
    let name = name.strip_suffix("-ext").unwrap_or(name);
    let (prefix, sizes) = name.split_once("custom-")?;
    if !(prefix.is_empty() || prefix.ends_with('-')) {
        return None;
    }
    let (cpus, mb) = sizes.split_once('-')?;
    Some((cpus.parse().ok()?, mb.parse().ok()?))
}

/// Memory size in MB; a bare number is GB, like `--custom-memory`
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "checked finite and non-negative before the cast"
)]
fn memory_mb(value: &str) -> Option<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;
    let factor = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "G" | "GB" | "GIB" => 1024.0,
        "M" | "MB" | "MIB" => 1.0,
        _ => return None,
    };
    let mb = number * factor;
    (mb.is_finite() && mb >= 0.0).then(|| mb.round() as u64)
}

/// Exact match, or `actual` is a resource URL ending in `/declared`
///
/// Control planes echo zones and machine types as full self-links.
fn values_match(declared: &str, actual: &str) -> bool {
    if declared == actual {
        return true;
    }
    actual
        .strip_suffix(declared)
        .is_some_and(|prefix| prefix.ends_with('/'))
}

/// `k=v,k2=v2` as a map; `None` for anything else
fn parse_map(value: &str) -> Option<BTreeMap<String, String>> {
    if !value.contains('=') {
        return None;
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

fn nested_attributes(state: &ResourceState, prefix: &str) -> BTreeMap<String, String> {
    let prefix = format!("{prefix}.");
    state
        .attributes
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
        .collect()
}

fn render_map(map: &BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
