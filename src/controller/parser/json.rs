//! # JSON Location and Flattening
//!
//! CLI tools interleave progress and warning lines with their JSON document.
//! These helpers find the document and flatten it into string attributes.

use crate::constants::{MAX_JSON_CANDIDATES, MAX_SNIPPET_CHARS};
use crate::controller::executor::classify::bounded;
use serde_json::Value;
use std::collections::BTreeMap;

/// Locate the first well-formed JSON document in `raw`
///
/// Lines starting with `{`/`[` are tried first, then the first `{`/`[` of
/// every other line, stopping at the first document that parses. Only
/// objects, and arrays whose items are all objects, count as documents, so a
/// log prefix like `[1/3]` is never mistaken for one. Anything after the
/// document is ignored.
#[must_use]
pub fn locate_json(raw: &str) -> Option<Value> {
    candidates(raw).find_map(|idx| decode_document(&raw[idx..]))
}

/// Byte offsets worth a parse attempt, at most [`MAX_JSON_CANDIDATES`]
fn candidates(raw: &str) -> impl Iterator<Item = usize> + '_ {
    let offset = move |part: &str| part.as_ptr() as usize - raw.as_ptr() as usize;
    let line_starts = raw.lines().filter_map(move |line| {
        let trimmed = line.trim_start();
        trimmed.starts_with(['{', '[']).then(|| offset(trimmed))
    });
    let mid_line = raw.lines().filter_map(move |line| {
        let trimmed = line.trim_start();
        if trimmed.starts_with(['{', '[']) {
            return None;
        }
        trimmed.find(['{', '[']).map(|idx| offset(trimmed) + idx)
    });
    line_starts.chain(mid_line).take(MAX_JSON_CANDIDATES)
}

fn decode_document(text: &str) -> Option<Value> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) if is_document(&value) => Some(value),
        _ => None,
    }
}

fn is_document(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().all(Value::is_object),
        _ => false,
    }
}

/// Flatten nested JSON into dotted keys (`networkInterfaces[0].networkIP`)
///
/// `null` leaves are skipped: an unset optional field is simply absent.
pub fn flatten_json_value(value: &Value, prefix: String, result: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let new_prefix = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_json_value(val, new_prefix, result);
            }
        }
        Value::Array(seq) => {
            for (idx, val) in seq.iter().enumerate() {
                flatten_json_value(val, format!("{prefix}[{idx}]"), result);
            }
        }
        Value::String(s) => {
            result.insert(prefix, s.clone());
        }
        Value::Number(n) => {
            result.insert(prefix, n.to_string());
        }
        Value::Bool(b) => {
            result.insert(prefix, b.to_string());
        }
        Value::Null => {}
    }
}

/// Bounded excerpt of raw output for error messages
#[must_use]
pub fn snippet(raw: &str) -> String {
    bounded(raw.trim(), MAX_SNIPPET_CHARS)
}

/// Stand-in for a snippet when the raw text may hold secret values
#[must_use]
pub fn redacted_snippet(raw: &str) -> String {
    format!("<redacted, {} bytes>", raw.len())
}
