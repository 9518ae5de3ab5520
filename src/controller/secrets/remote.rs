//! # Remote Bundle Wire Format
//!
//! The remote store holds an ordered JSON array of `{key, value}` objects.
//! Encoding goes through `serde_json`, which escapes quotes, newlines and
//! control characters reversibly; nothing is concatenated by hand.

use super::error::SecretSyncError;
use super::SecretBundle;
use crate::controller::parser::{json, MalformedOutputError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

#[derive(Serialize)]
struct WireEntryRef<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct WireEntry {
    key: String,
    value: String,
}

/// Serialise `bundle` into the remote payload
///
/// Empty values are kept: an empty string is a value, not an absent entry.
///
/// # Errors
///
/// Returns [`SecretSyncError::Encode`] if serialisation fails.
pub fn to_remote(bundle: &SecretBundle) -> Result<Zeroizing<String>, SecretSyncError> {
    let wire: Vec<WireEntryRef<'_>> = bundle
        .entries()
        .map(|e| WireEntryRef {
            key: &e.key,
            value: e.value(),
        })
        .collect();
    serde_json::to_string(&wire)
        .map(Zeroizing::new)
        .map_err(|_| SecretSyncError::Encode {
            bundle: bundle.name.clone(),
        })
}

/// Decode a remote payload into a bundle named `name`
///
/// Accepts a bare array or an object with an `entries` array, located amid any
/// log noise. Trailing carriage returns added by the transport are stripped
/// from keys and values. Empty output decodes to an empty bundle.
///
/// # Errors
///
/// Returns [`MalformedOutputError`] whose detail and snippet never contain the
/// payload text.
pub fn from_remote(name: &str, raw: &str) -> Result<SecretBundle, MalformedOutputError> {
    let mut bundle = SecretBundle::new(name);
    if raw.trim().is_empty() {
        return Ok(bundle);
    }

    let malformed =
        |detail: String| MalformedOutputError::new("secret bundle", detail, json::redacted_snippet(raw));

    let value = json::locate_json(raw)
        .ok_or_else(|| malformed("no JSON document found".to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut doc) => match doc.remove("entries") {
            Some(Value::Array(items)) => items,
            _ => return Err(malformed("expected an 'entries' array".to_string())),
        },
        _ => return Err(malformed("expected a JSON array".to_string())),
    };

    for (idx, item) in items.into_iter().enumerate() {
        // serde's message may quote the offending value, so only the category is kept
        let entry: WireEntry = serde_json::from_value(item).map_err(|e| {
            malformed(format!(
                "entry {} does not match {{key, value}} ({:?} error)",
                idx + 1,
                e.classify()
            ))
        })?;
        let key = entry.key.trim_end_matches('\r').to_string();
        let mut value = entry.value;
        let kept = value.trim_end_matches('\r').len();
        value.truncate(kept);
        bundle.insert(key, value);
    }

    Ok(bundle)
}
