//! Cache key derivation.
//!
//! A key is a readable, normalized body followed by a short SHA-256 digest of
//! the raw components:
//!
//! ```text
//! access:<region>:<item_type>:<source>:<identity>:<digest16>
//! ```
//!
//! Normalization replaces every non-alphanumeric character with `_` and the
//! body is capped at a configurable length. Both steps are lossy, so the
//! digest is what keeps distinct contexts apart.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::KEY_DIGEST_HEX_LEN;
use crate::context::AccessContext;
use crate::enums::CacheTier;

const KEY_PREFIX: &str = "access";

/// Separates raw components inside the digest input.
const UNIT_SEPARATOR: char = '\u{1F}';

/// Identity used when a context has neither provider id nor url.
const NO_IDENTITY: &str = "none";

/// Logical cache key for one access context.
///
/// Only [`AccessKey::derive`] builds one, so every key in the system went
/// through the same normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessKey {
    inner: AccessKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct AccessKeyInner {
    value: String,
}

impl AccessKey {
    /// Derive the key for `ctx` within `region`.
    ///
    /// `max_len` caps the normalized body; the `:` and digest suffix are
    /// appended after truncation.
    pub fn derive(region: &str, ctx: &AccessContext, max_len: usize) -> Self {
        let item_type = ctx.normalized_item_type();
        let identity = ctx.identity().unwrap_or(NO_IDENTITY);
        let components = [region, item_type.as_str(), ctx.source.as_str(), identity];

        let mut body = String::from(KEY_PREFIX);
        for component in &components {
            body.push(':');
            body.push_str(&normalize_component(component));
        }
        // Normalized text is pure ASCII, so byte truncation is char-safe.
        body.truncate(max_len);

        let mut value = body;
        value.push(':');
        value.push_str(&digest(&components));

        Self {
            inner: AccessKeyInner { value },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.inner.value
    }

    /// Key of this entry in the given network tier.
    pub fn tier_key(&self, tier: CacheTier) -> String {
        format!("{}:{}", self.inner.value, tier.as_str())
    }

    pub fn edge_key(&self) -> String {
        self.tier_key(CacheTier::Edge)
    }

    pub fn core_key(&self) -> String {
        self.tier_key(CacheTier::Core)
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.value)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

fn normalize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn digest(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, component) in components.iter().enumerate() {
        if i > 0 {
            let mut buf = [0u8; 4];
            hasher.update(UNIT_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        }
        hasher.update(component.as_bytes());
    }
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(KEY_DIGEST_HEX_LEN);
    hex
}
