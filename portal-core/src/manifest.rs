//! Access manifests: how a client should open a content item.

use serde::{Deserialize, Serialize};

use crate::constants::FALLBACK_FORMAT;

/// How a client opens the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Stream,
    Embed,
    File,
    #[serde(rename = "openweb")]
    OpenWeb,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Embed => "embed",
            Self::File => "file",
            Self::OpenWeb => "openweb",
        }
    }
}

/// Resolved "how to open this" descriptor.
///
/// Every URL field that is present must point at a host outside the
/// platform; the orchestrator enforces this before caching or returning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessManifest {
    pub mode: AccessMode,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_web: Option<String>,
}

impl AccessManifest {
    /// Stream manifest, e.g. an HLS playlist.
    pub fn stream(format: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            mode: AccessMode::Stream,
            format: format.into(),
            uri: Some(uri.into()),
            embed: None,
            open_web: None,
        }
    }

    /// Embeddable iframe manifest.
    pub fn embed(format: impl Into<String>, embed: impl Into<String>) -> Self {
        Self {
            mode: AccessMode::Embed,
            format: format.into(),
            uri: None,
            embed: Some(embed.into()),
            open_web: None,
        }
    }

    /// Direct file manifest.
    pub fn file(format: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            mode: AccessMode::File,
            format: format.into(),
            uri: Some(uri.into()),
            embed: None,
            open_web: None,
        }
    }

    /// Generic web-link manifest, also used as the budget fallback.
    pub fn open_web(url: impl Into<String>) -> Self {
        Self {
            mode: AccessMode::OpenWeb,
            format: FALLBACK_FORMAT.to_string(),
            uri: None,
            embed: None,
            open_web: Some(url.into()),
        }
    }

    /// Attach a web link alongside the primary access URL.
    pub fn with_open_web(mut self, url: impl Into<String>) -> Self {
        self.open_web = Some(url.into());
        self
    }

    /// Present URL fields as `(field_name, url)` pairs.
    pub fn urls(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("uri", self.uri.as_deref()),
            ("embed", self.embed.as_deref()),
            ("openWeb", self.open_web.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, url)| url.map(|u| (field, u)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_wire_shape() {
        let manifest = AccessManifest::embed("html", "https://www.youtube.com/embed/abc123")
            .with_open_web("https://youtube.com/watch?v=abc123");
        let json = serde_json::to_value(&manifest).unwrap();

        assert_eq!(json["mode"], "embed");
        assert_eq!(json["format"], "html");
        assert_eq!(json["embed"], "https://www.youtube.com/embed/abc123");
        assert_eq!(json["openWeb"], "https://youtube.com/watch?v=abc123");
        assert!(json.get("uri").is_none());
    }

    #[test]
    fn test_openweb_mode_name() {
        let json = serde_json::to_string(&AccessMode::OpenWeb).unwrap();
        assert_eq!(json, "\"openweb\"");
    }

    #[test]
    fn test_urls_lists_present_fields() {
        let manifest = AccessManifest::stream("hls", "https://cdn.example.com/v.m3u8")
            .with_open_web("https://example.com/v");
        let urls: Vec<_> = manifest.urls().collect();
        assert_eq!(
            urls,
            vec![
                ("uri", "https://cdn.example.com/v.m3u8"),
                ("openWeb", "https://example.com/v")
            ]
        );
    }
}
