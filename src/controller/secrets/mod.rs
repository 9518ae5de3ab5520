//! # Secret Synchronizer
//!
//! Bidirectional transform between a local `KEY=VALUE` store and the remote
//! secret-bundle wire form (an ordered JSON array of `{key, value}`).
//!
//! ```text
//! local lines ──from_local_store──► SecretBundle ──to_remote──► [{key,value}]
//!      ▲                                 │  ▲                        │
//!      └─────────to_local_store──────────┘  └───────from_remote──────┘
//! ```
//!
//! SECURITY: values live in [`Zeroizing`] buffers, are redacted from `Debug`,
//! and bundles are compared by SHA-256 digest so values never enter diffs or
//! logs.

pub mod error;
pub mod local_store;
pub mod remote;
pub mod sync;

pub use error::{MalformedEntryError, SecretSyncError};
pub use local_store::{from_local_store, to_local_store};
pub use remote::{from_remote, to_remote};

use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Placeholder substituted for secret values in diagnostic text
pub const REDACTED: &str = "<redacted>";

/// One `(key, value)` entry of a bundle
#[derive(Clone, PartialEq, Eq)]
pub struct SecretEntry {
    pub key: String,
    value: Zeroizing<String>,
}

impl SecretEntry {
    #[must_use]
    pub fn value(&self) -> &str {
        self.value.as_str()
    }
}

impl fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretEntry")
            .field("key", &self.key)
            .field("value", &REDACTED)
            .finish()
    }
}

/// Named, ordered set of secret entries with unique keys
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SecretBundle {
    pub name: String,
    entries: Vec<SecretEntry>,
}

impl SecretBundle {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Build a bundle from pairs; later duplicates overwrite earlier values
    #[must_use]
    pub fn from_entries(name: impl Into<String>, entries: Vec<(String, String)>) -> Self {
        let mut bundle = Self::new(name);
        for (key, value) in entries {
            bundle.insert(key, value);
        }
        bundle
    }

    /// Insert or overwrite `key`
    ///
    /// Last write wins; an overwritten key keeps its original position.
    pub fn insert(&mut self, key: String, value: String) {
        let value = Zeroizing::new(value);
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => existing.value = value,
            None => self.entries.push(SecretEntry { key, value }),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(SecretEntry::value)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SecretEntry> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hex SHA-256 over the ordered entries
    ///
    /// Each key and value is length-prefixed so `("a", "bc")` and `("ab", "c")`
    /// never collide. The bundle name is not part of the digest.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update((entry.key.len() as u64).to_be_bytes());
            hasher.update(entry.key.as_bytes());
            hasher.update((entry.value.len() as u64).to_be_bytes());
            hasher.update(entry.value.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Replace every non-empty value of this bundle found in `text`
    ///
    /// Longer values are replaced first so a value that contains another is
    /// fully masked.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let mut values: Vec<&str> = self
            .entries
            .iter()
            .map(SecretEntry::value)
            .filter(|v| !v.is_empty())
            .collect();
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));

        let mut redacted = text.to_string();
        for value in values {
            if redacted.contains(value) {
                redacted = redacted.replace(value, REDACTED);
            }
        }
        redacted
    }
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("name", &self.name)
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}
