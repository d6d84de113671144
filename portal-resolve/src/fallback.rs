//! Budget fallback.
//!
//! When the budget fires first the caller gets a generic web link built
//! from the context, held to the same schema and policy checks as a
//! resolver manifest.

use portal_core::{
    AccessContext, AccessManifest, EnhancedAccessResult, ManifestValidator, ResolveError, UrlPolicy,
};
use std::time::Duration;

/// PENDING result for a resolution that exceeded `budget`.
///
/// Carries an `openweb` manifest for `ctx.url` (or the metadata fallback
/// URL) when one exists and passes the checks; otherwise `access` is empty
/// and `error` names the exceeded budget.
pub fn budget_fallback(
    ctx: &AccessContext,
    budget: Duration,
    validator: &dyn ManifestValidator,
    policy: &UrlPolicy,
) -> EnhancedAccessResult {
    let exceeded = || Some(ResolveError::budget_exceeded(budget).to_string());

    let Some(url) = ctx.fallback_url() else {
        return EnhancedAccessResult::pending(None, exceeded());
    };

    let manifest = AccessManifest::open_web(url);
    if let Err(e) = validator.validate(&manifest) {
        tracing::debug!(item_type = %ctx.item_type, error = %e, "Fallback manifest failed validation");
        return EnhancedAccessResult::pending(None, exceeded());
    }
    if let Err(e) = policy.check(&manifest) {
        tracing::debug!(item_type = %ctx.item_type, error = %e, "Fallback manifest rejected by policy");
        return EnhancedAccessResult::pending(None, exceeded());
    }

    EnhancedAccessResult::pending(Some(manifest), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::{AccessMode, ReadinessState, SchemaValidator};

    fn fallback(ctx: &AccessContext) -> EnhancedAccessResult {
        budget_fallback(
            ctx,
            Duration::from_millis(200),
            &SchemaValidator,
            &UrlPolicy::default(),
        )
    }

    #[test]
    fn test_uses_context_url() {
        let ctx = AccessContext::new("video", "feed").with_url("https://vimeo.com/123");
        let result = fallback(&ctx);
        assert_eq!(result.readiness, ReadinessState::Pending);
        assert!(result.error.is_none());

        let access = result.access.unwrap();
        assert_eq!(access.mode, AccessMode::OpenWeb);
        assert_eq!(access.format, "html");
        assert_eq!(access.open_web.as_deref(), Some("https://vimeo.com/123"));
    }

    #[test]
    fn test_uses_metadata_when_url_missing() {
        let ctx = AccessContext::new("ebook", "catalog")
            .with_metadata("webUrl", "https://books.example.org/42");
        let access = fallback(&ctx).access.unwrap();
        assert_eq!(access.open_web.as_deref(), Some("https://books.example.org/42"));
    }

    #[test]
    fn test_no_url_reports_budget() {
        let ctx = AccessContext::new("game", "catalog").with_provider_id("g-1");
        let result = fallback(&ctx);
        assert!(result.access.is_none());
        assert_eq!(
            result.error.as_deref(),
            Some("Resolution budget of 200ms exceeded")
        );
    }

    #[test]
    fn test_internal_url_is_not_offered() {
        let ctx = AccessContext::new("document", "upload").with_url("http://127.0.0.1:8080/doc");
        let result = fallback(&ctx);
        assert!(result.access.is_none());
        assert_eq!(result.readiness, ReadinessState::Pending);
        assert!(result.error.unwrap().contains("budget"));
    }

    #[test]
    fn test_malformed_url_is_not_offered() {
        let ctx = AccessContext::new("document", "upload").with_url("not a url");
        assert!(fallback(&ctx).access.is_none());
    }
}
