use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entry holding the account's identity; present once pairing succeeded.
pub const CREDS_ENTRY: &str = "creds";

/// Per-account authentication material as a set of named JSON entries.
///
/// Each entry is persisted as its own `<name>.json` file, so JSON looks like:
/// `{ "creds": { ... }, "pre-key-1": { ... } }`
///
/// Setting an entry to `null` and saving removes it from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialState {
    entries: BTreeMap<String, Value>,
}

impl CredentialState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once the account completed pairing at least once.
    pub fn is_registered(&self) -> bool {
        self.entries.get(CREDS_ENTRY).is_some_and(|v| !v.is_null())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(name.into(), value)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for CredentialState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
