//! Manifest shape validation.

use url::Url;

use crate::constants::MAX_FORMAT_LEN;
use crate::error::ValidationError;
use crate::manifest::{AccessManifest, AccessMode};

/// Rejects malformed manifests before they are cached or returned.
pub trait ManifestValidator: Send + Sync {
    fn validate(&self, manifest: &AccessManifest) -> Result<(), ValidationError>;
}

/// Default structural validator.
///
/// Checks that:
/// - `format` is non-blank and at most [`MAX_FORMAT_LEN`] characters
/// - the field required by the mode is present
/// - every present URL is an absolute `http`/`https` URL with a host
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }
}

impl ManifestValidator for SchemaValidator {
    fn validate(&self, manifest: &AccessManifest) -> Result<(), ValidationError> {
        let format = manifest.format.trim();
        if format.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "format".to_string(),
            });
        }
        if format.chars().count() > MAX_FORMAT_LEN {
            return Err(ValidationError::InvalidValue {
                field: "format".to_string(),
                reason: format!("longer than {} characters", MAX_FORMAT_LEN),
            });
        }

        let (required, value) = match manifest.mode {
            AccessMode::Stream | AccessMode::File => ("uri", &manifest.uri),
            AccessMode::Embed => ("embed", &manifest.embed),
            AccessMode::OpenWeb => ("openWeb", &manifest.open_web),
        };
        if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
            return Err(ValidationError::RequiredFieldMissing {
                field: required.to_string(),
            });
        }

        for (field, raw) in manifest.urls() {
            check_url(field, raw)?;
        }
        Ok(())
    }
}

fn check_url(field: &str, raw: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported scheme {}", other))),
    }
    if url.host().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(manifest: &AccessManifest) -> Result<(), ValidationError> {
        SchemaValidator::new().validate(manifest)
    }

    #[test]
    fn test_accepts_well_formed_manifests() {
        assert!(validate(&AccessManifest::stream("hls", "https://cdn.example.com/a.m3u8")).is_ok());
        assert!(validate(&AccessManifest::file("pdf", "http://files.example.com/a.pdf")).is_ok());
        assert!(validate(&AccessManifest::open_web("https://example.org/")).is_ok());
        assert!(validate(
            &AccessManifest::embed("html", "https://www.youtube.com/embed/abc123")
                .with_open_web("https://youtube.com/watch?v=abc123")
        )
        .is_ok());
    }

    #[test]
    fn test_mode_requires_its_field() {
        let mut manifest = AccessManifest::embed("html", "https://www.youtube.com/embed/x");
        manifest.embed = None;
        manifest.uri = Some("https://example.org".to_string());
        assert_eq!(
            validate(&manifest),
            Err(ValidationError::RequiredFieldMissing {
                field: "embed".to_string()
            })
        );
    }

    #[test]
    fn test_blank_and_oversized_format() {
        let mut manifest = AccessManifest::open_web("https://example.org");
        manifest.format = "  ".to_string();
        assert!(matches!(
            validate(&manifest),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));

        manifest.format = "x".repeat(MAX_FORMAT_LEN + 1);
        assert!(matches!(
            validate(&manifest),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_rejects_non_http_and_relative_urls() {
        for bad in ["ftp://example.org/a", "/relative/path", "javascript:alert(1)", "not a url"] {
            let manifest = AccessManifest::open_web(bad);
            assert!(validate(&manifest).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_secondary_url_is_checked() {
        let manifest = AccessManifest::stream("hls", "https://cdn.example.com/a.m3u8")
            .with_open_web("file:///etc/passwd");
        assert!(matches!(
            validate(&manifest),
            Err(ValidationError::InvalidValue { field, .. }) if field == "openWeb"
        ));
    }
}
