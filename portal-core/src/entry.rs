//! Cache entries, resolver outputs and the caller-facing result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::DEFAULT_BUDGET_MS;
use crate::enums::{CacheStatus, CacheTier, ReadinessState, ResolutionOutcome};
use crate::error::PortalError;
use crate::manifest::AccessManifest;

// ============================================================================
// CACHE ENTRY
// ============================================================================

/// A cached resolution, as stored in either tier.
///
/// `state` and `ttl_ms` are recomputed on every read from the entry's age;
/// the stored values only describe the entry at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub access: Option<AccessManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub state: ReadinessState,
    pub ttl_ms: u64,
    pub tier: CacheTier,
}

impl CacheEntry {
    /// Fresh entry for a manifest written now.
    pub fn fresh(access: AccessManifest, tier: CacheTier, ttl: Duration) -> Self {
        Self {
            access: Some(access),
            error: None,
            timestamp: Utc::now(),
            state: ReadinessState::Ready,
            ttl_ms: ttl.as_millis() as u64,
            tier,
        }
    }

    /// Age of the entry relative to `now`; zero for clock skew into the future.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }
}

// ============================================================================
// RESOLVER OUTPUT
// ============================================================================

/// What a resolver hands back for a context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolverOutput {
    pub access: Option<AccessManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolverOutput {
    pub fn found(access: AccessManifest) -> Self {
        Self {
            access: Some(access),
            error: None,
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self {
            access: None,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// RESOLVE OPTIONS
// ============================================================================

/// Per-call options for a cached resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Latency budget before a fallback is returned.
    pub budget: Duration,
    /// Skip the cache read (the result is still written through).
    pub skip_cache: bool,
    /// Skip the early in-flight join and the cache read.
    pub force_refresh: bool,
    /// Abort the full resolution when the budget wins instead of letting it
    /// finish in the background.
    pub cancel_on_timeout: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            budget: Duration::from_millis(DEFAULT_BUDGET_MS),
            skip_cache: false,
            force_refresh: false,
            cancel_on_timeout: false,
        }
    }
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_budget_ms(self, budget_ms: u64) -> Self {
        self.with_budget(Duration::from_millis(budget_ms))
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn cancel_on_timeout(mut self) -> Self {
        self.cancel_on_timeout = true;
        self
    }

    /// Whether the cache read is bypassed.
    pub fn bypasses_cache(&self) -> bool {
        self.skip_cache || self.force_refresh
    }
}

// ============================================================================
// ENHANCED ACCESS RESULT
// ============================================================================

/// Caller-facing outcome of a cached resolution. Never an error: missing
/// access is `access = None` plus a non-empty `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedAccessResult {
    pub access: Option<AccessManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub readiness: ReadinessState,
    pub from_cache: bool,
    pub coalesced: bool,
    pub cache_status: CacheStatus,
    pub latency_ms: u64,
    pub ttl_ms: u64,
}

impl EnhancedAccessResult {
    /// Freshly resolved manifest.
    pub fn ready(access: AccessManifest, ttl: Duration) -> Self {
        Self {
            access: Some(access),
            error: None,
            readiness: ReadinessState::Ready,
            from_cache: false,
            coalesced: false,
            cache_status: CacheStatus::Miss,
            latency_ms: 0,
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// Failed resolution.
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            access: None,
            error: Some(error.into()),
            readiness: ReadinessState::Degraded,
            from_cache: false,
            coalesced: false,
            cache_status: CacheStatus::Miss,
            latency_ms: 0,
            ttl_ms: 0,
        }
    }

    /// Failed resolution from a typed error.
    pub fn from_error(error: &PortalError) -> Self {
        Self::degraded(error.to_string())
    }

    /// Budget fallback.
    pub fn pending(access: Option<AccessManifest>, error: Option<String>) -> Self {
        Self {
            access,
            error,
            readiness: ReadinessState::Pending,
            from_cache: false,
            coalesced: false,
            cache_status: CacheStatus::Miss,
            latency_ms: 0,
            ttl_ms: 0,
        }
    }

    /// Result served from a cache entry.
    pub fn from_entry(entry: CacheEntry) -> Self {
        Self {
            access: entry.access,
            error: entry.error,
            readiness: entry.state,
            from_cache: true,
            coalesced: false,
            cache_status: CacheStatus::hit(entry.tier),
            latency_ms: 0,
            ttl_ms: entry.ttl_ms,
        }
    }

    pub fn with_cache_status(mut self, status: CacheStatus) -> Self {
        self.cache_status = status;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    /// Mark as a joined result of someone else's resolution.
    pub fn as_coalesced(mut self) -> Self {
        self.coalesced = true;
        self.cache_status = CacheStatus::Coalesced;
        self
    }

    /// Telemetry outcome label.
    pub fn outcome(&self) -> ResolutionOutcome {
        match (self.readiness, self.access.is_some()) {
            (ReadinessState::Ready, true) => ResolutionOutcome::Resolved,
            (ReadinessState::Degraded, true) => ResolutionOutcome::Stale,
            (ReadinessState::Pending, _) => ResolutionOutcome::Fallback,
            _ => ResolutionOutcome::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == ReadinessState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_options_defaults() {
        let opts = ResolveOptions::default();
        assert_eq!(opts.budget, Duration::from_millis(200));
        assert!(!opts.skip_cache);
        assert!(!opts.force_refresh);
        assert!(!opts.cancel_on_timeout);
        assert!(!opts.bypasses_cache());
        assert!(ResolveOptions::new().force_refresh().bypasses_cache());
    }

    #[test]
    fn test_entry_roundtrips_timestamp_as_millis() {
        let entry = CacheEntry::fresh(
            AccessManifest::open_web("https://example.org"),
            CacheTier::Core,
            Duration::from_secs(600),
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json["timestamp"].is_i64());

        let back: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.timestamp.timestamp_millis(), entry.timestamp.timestamp_millis());
        assert_eq!(back.tier, CacheTier::Core);
    }

    #[test]
    fn test_age_never_negative() {
        let mut entry = CacheEntry::fresh(
            AccessManifest::open_web("https://example.org"),
            CacheTier::Edge,
            Duration::from_secs(60),
        );
        entry.timestamp = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(entry.age(), Duration::ZERO);
    }

    #[test]
    fn test_outcome_labels() {
        let manifest = AccessManifest::open_web("https://example.org");
        assert_eq!(
            EnhancedAccessResult::ready(manifest.clone(), Duration::ZERO).outcome(),
            ResolutionOutcome::Resolved
        );
        assert_eq!(
            EnhancedAccessResult::degraded("boom").outcome(),
            ResolutionOutcome::Failed
        );
        assert_eq!(
            EnhancedAccessResult::pending(None, Some("late".into())).outcome(),
            ResolutionOutcome::Fallback
        );

        let mut stale = CacheEntry::fresh(manifest, CacheTier::Core, Duration::from_secs(10));
        stale.state = ReadinessState::Degraded;
        let result = EnhancedAccessResult::from_entry(stale);
        assert!(result.from_cache);
        assert_eq!(result.cache_status, CacheStatus::CoreHit);
        assert_eq!(result.outcome(), ResolutionOutcome::Stale);
    }

    #[test]
    fn test_coalesced_marker() {
        let result = EnhancedAccessResult::degraded("x").as_coalesced();
        assert!(result.coalesced);
        assert_eq!(result.cache_status, CacheStatus::Coalesced);
    }
}
