//! Access contexts: what is being resolved, and the inputs resolvers read.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata keys consulted, in order, when deriving a fallback web link.
const FALLBACK_URL_KEYS: &[&str] = &["openWebUrl", "webUrl", "externalUrl", "url", "link"];

/// Provider metadata attached to a context.
///
/// Kept as an opaque key-value map; callers read it through the typed
/// accessors below rather than poking at raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextMetadata(BTreeMap<String, Value>);

impl ContextMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value, trimmed; `None` for missing, non-string or blank values.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// First usable web link found in the well-known keys.
    pub fn fallback_url(&self) -> Option<&str> {
        FALLBACK_URL_KEYS.iter().find_map(|key| self.get_str(key))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ContextMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Identifies the item being resolved. Built per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessContext {
    /// Item type, e.g. `video`, `ebook`, `governance`.
    pub item_type: String,
    /// Where the item came from (catalog, feed, provider name...).
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "ContextMetadata::is_empty")]
    pub metadata: ContextMetadata,
}

impl AccessContext {
    pub fn new(item_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            source: source.into(),
            provider_id: None,
            url: None,
            metadata: ContextMetadata::new(),
        }
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Item type as used for registry lookups: trimmed and lower-cased.
    pub fn normalized_item_type(&self) -> String {
        normalize_item_type(&self.item_type)
    }

    /// Identity of the item within its source: provider id, else url.
    pub fn identity(&self) -> Option<&str> {
        self.provider_id
            .as_deref()
            .or(self.url.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// URL to fall back to when the budget fires: `url`, else metadata.
    pub fn fallback_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| self.metadata.fallback_url())
    }
}

/// Canonical form of an item type.
pub fn normalize_item_type(item_type: &str) -> String {
    item_type.trim().to_lowercase()
}
