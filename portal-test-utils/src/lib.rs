//! PORTAL Test Utilities
//!
//! Centralized test infrastructure for the PORTAL workspace:
//! - Mock resolvers (video, counting, slow, failing, panicking)
//! - Failing key-value store and recording telemetry listener
//! - Proptest generators for contexts, hosts and manifests
//! - Test fixtures for engines and seeded cache entries
//! - Custom assertions for PORTAL-specific results

// Re-export core types for convenience
pub use portal_core::{
    AccessContext, AccessKey, AccessManifest, AccessMode, CacheEntry, CacheStatus, CacheTier,
    EnhancedAccessResult, PortalError, PortalResult, ReadinessState, ResolutionOutcome,
    ResolveOptions, ResolverOutput,
};
pub use portal_resolve::{
    CacheHitEvent, CoalescedEvent, EngineConfig, ResolutionEvent, ResolutionOrchestrator,
    TelemetryListener,
};
pub use portal_storage::{InMemoryKvStore, KeyValueStore};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// MOCK RESOLVERS
// ============================================================================

/// Video resolver for YouTube watch and short links.
///
/// `https://youtube.com/watch?v=<id>` and `https://youtu.be/<id>` become an
/// embed manifest for `https://www.youtube.com/embed/<id>` that keeps the
/// original link as `openWeb`. Anything else becomes a plain web link.
#[derive(Debug, Default)]
pub struct VideoResolver {
    calls: AtomicUsize,
}

impl VideoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn youtube_id(raw: &str) -> Option<String> {
        let parsed = url::Url::parse(raw).ok()?;
        let host = parsed.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
        match host {
            "youtube.com" => parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            "youtu.be" => parsed
                .path_segments()?
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            _ => None,
        }
    }
}

#[async_trait]
impl portal_resolve::AccessResolver for VideoResolver {
    async fn resolve(&self, ctx: &AccessContext) -> PortalResult<ResolverOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(url) = ctx.url.as_deref() else {
            return Ok(ResolverOutput::not_found("Video has no url"));
        };
        let access = match Self::youtube_id(url) {
            Some(id) => AccessManifest::embed("html", format!("https://www.youtube.com/embed/{}", id))
                .with_open_web(url),
            None => AccessManifest::open_web(url),
        };
        Ok(ResolverOutput::found(access))
    }
}

/// Returns a fixed output after an optional delay, counting calls.
#[derive(Debug)]
pub struct CountingResolver {
    output: ResolverOutput,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingResolver {
    pub fn new(output: ResolverOutput) -> Self {
        Self {
            output,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Resolver that always finds `manifest`.
    pub fn returning(manifest: AccessManifest) -> Self {
        Self::new(ResolverOutput::found(manifest))
    }

    /// Resolver that finds `manifest` after `delay`.
    pub fn slow(manifest: AccessManifest, delay: Duration) -> Self {
        Self::returning(manifest).with_delay(delay)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl portal_resolve::AccessResolver for CountingResolver {
    async fn resolve(&self, _ctx: &AccessContext) -> PortalResult<ResolverOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.output.clone())
    }
}

/// Always fails with an upstream error.
#[derive(Debug, Clone)]
pub struct FailingResolver {
    reason: String,
}

impl FailingResolver {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl portal_resolve::AccessResolver for FailingResolver {
    async fn resolve(&self, _ctx: &AccessContext) -> PortalResult<ResolverOutput> {
        Err(PortalError::unavailable("upstream", self.reason.clone()))
    }
}

/// Panics on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanickingResolver;

#[async_trait]
impl portal_resolve::AccessResolver for PanickingResolver {
    async fn resolve(&self, _ctx: &AccessContext) -> PortalResult<ResolverOutput> {
        panic!("resolver panicked on purpose");
    }
}

// ============================================================================
// MOCK STORES
// ============================================================================

/// Key-value store whose every operation fails as unavailable.
#[derive(Debug, Default)]
pub struct FailingKvStore {
    attempts: AtomicUsize,
}

impl FailingKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> PortalResult<T> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PortalError::unavailable("failing", "connection refused"))
    }
}

#[async_trait]
impl KeyValueStore for FailingKvStore {
    async fn get(&self, _key: &str) -> PortalResult<Option<Vec<u8>>> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> PortalResult<()> {
        self.fail()
    }

    async fn del(&self, _keys: &[String]) -> PortalResult<u64> {
        self.fail()
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

// ============================================================================
// TELEMETRY
// ============================================================================

/// Listener that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    resolutions: Mutex<Vec<ResolutionEvent>>,
    cache_hits: Mutex<Vec<CacheHitEvent>>,
    coalesced: Mutex<Vec<CoalescedEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolutions(&self) -> Vec<ResolutionEvent> {
        self.resolutions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cache_hits(&self) -> Vec<CacheHitEvent> {
        self.cache_hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn coalesced(&self) -> Vec<CoalescedEvent> {
        self.coalesced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TelemetryListener for RecordingListener {
    async fn on_resolution(&self, event: ResolutionEvent) -> PortalResult<()> {
        self.resolutions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }

    async fn on_cache_hit(&self, event: CacheHitEvent) -> PortalResult<()> {
        self.cache_hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }

    async fn on_coalesced(&self, event: CoalescedEvent) -> PortalResult<()> {
        self.coalesced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for PORTAL inputs.

    use super::*;
    use proptest::prelude::*;

    /// Item types the platform resolves.
    pub fn arb_item_type() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("video"),
            Just("ebook"),
            Just("game"),
            Just("product"),
            Just("audio"),
            Just("app"),
            Just("document"),
            Just("governance"),
            Just("gallery"),
            Just("live-channel"),
        ]
        .prop_map(str::to_string)
    }

    pub fn arb_source() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    /// A public host that no default policy blocks.
    pub fn arb_external_host() -> impl Strategy<Value = String> {
        ("[a-z][a-z0-9]{1,12}", prop_oneof![Just("com"), Just("org"), Just("io"), Just("net")])
            .prop_map(|(label, tld)| format!("{}.{}", label, tld))
    }

    /// A host every default policy treats as internal.
    pub fn arb_internal_host() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("localhost".to_string()),
            Just("127.0.0.1".to_string()),
            Just("0.0.0.0".to_string()),
            Just("[::1]".to_string()),
            (1u8..=254).prop_map(|n| format!("10.0.0.{}", n)),
            (16u8..=31).prop_map(|n| format!("172.{}.0.1", n)),
            (0u8..=255).prop_map(|n| format!("192.168.{}.1", n)),
            "[a-z]{1,10}".prop_map(|l| format!("{}.internal", l)),
            "[a-z]{1,10}".prop_map(|l| format!("{}.local", l)),
        ]
    }

    pub fn arb_external_url() -> impl Strategy<Value = String> {
        (arb_external_host(), "[a-z0-9]{0,12}")
            .prop_map(|(host, path)| format!("https://{}/{}", host, path))
    }

    pub fn arb_internal_url() -> impl Strategy<Value = String> {
        (arb_internal_host(), "[a-z0-9]{0,12}")
            .prop_map(|(host, path)| format!("http://{}/{}", host, path))
    }

    /// A context identified by provider id, url, both or neither.
    pub fn arb_access_context() -> impl Strategy<Value = AccessContext> {
        (
            arb_item_type(),
            arb_source(),
            proptest::option::of("[A-Za-z0-9:_-]{1,24}"),
            proptest::option::of(arb_external_url()),
        )
            .prop_map(|(item_type, source, provider_id, url)| {
                let mut ctx = AccessContext::new(item_type, source);
                ctx.provider_id = provider_id;
                ctx.url = url;
                ctx
            })
    }

    /// A schema-valid manifest pointing at external hosts.
    pub fn arb_manifest() -> impl Strategy<Value = AccessManifest> {
        (arb_external_url(), 0usize..4).prop_map(|(url, mode)| match mode {
            0 => AccessManifest::stream("hls", url),
            1 => AccessManifest::embed("html", url),
            2 => AccessManifest::file("pdf", url),
            _ => AccessManifest::open_web(url),
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made engines, contexts and cache entries.

    use super::*;

    pub const YOUTUBE_URL: &str = "https://youtube.com/watch?v=abc123";

    /// The canonical `video` context used across integration tests.
    pub fn youtube_context() -> AccessContext {
        AccessContext::new("video", "youtube").with_url(YOUTUBE_URL)
    }

    /// Engine over a fresh in-memory store with development settings.
    pub fn test_engine() -> (ResolutionOrchestrator, Arc<InMemoryKvStore>) {
        test_engine_with(EngineConfig::development())
    }

    pub fn test_engine_with(config: EngineConfig) -> (ResolutionOrchestrator, Arc<InMemoryKvStore>) {
        let kv = Arc::new(InMemoryKvStore::new());
        let engine = ResolutionOrchestrator::new(kv.clone(), config)
            .expect("test engine config should be valid");
        (engine, kv)
    }

    /// Engine with a [`RecordingListener`] attached.
    pub fn recording_engine() -> (ResolutionOrchestrator, Arc<InMemoryKvStore>, Arc<RecordingListener>) {
        let kv = Arc::new(InMemoryKvStore::new());
        let listener = Arc::new(RecordingListener::new());
        let engine = ResolutionOrchestrator::builder(kv.clone())
            .config(EngineConfig::development())
            .listener(listener.clone())
            .build()
            .expect("test engine config should be valid");
        (engine, kv, listener)
    }

    /// Write a core-tier entry for `ctx` that is already `age` old.
    pub async fn seed_core_entry(
        engine: &ResolutionOrchestrator,
        ctx: &AccessContext,
        manifest: AccessManifest,
        age: Duration,
    ) {
        let cache = engine.cache();
        let core_ttl = cache.config().core_ttl;
        let mut entry = CacheEntry::fresh(manifest, CacheTier::Core, core_ttl);
        entry.timestamp = chrono::Utc::now()
            - chrono::Duration::from_std(age).expect("age should fit chrono range");

        let bytes = serde_json::to_vec(&entry).expect("cache entry should serialize");
        let key = cache.key_for(ctx);
        cache
            .kv()
            .set(&key.core_key(), bytes, core_ttl.saturating_sub(age))
            .await
            .expect("seeding the core tier should succeed");
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over [`EnhancedAccessResult`] values.

    use super::*;

    pub fn assert_ready(result: &EnhancedAccessResult) {
        assert_eq!(
            result.readiness,
            ReadinessState::Ready,
            "Expected READY result, got {:?}",
            result
        );
        assert!(result.access.is_some(), "READY result without access: {:?}", result);
        assert!(result.error.is_none(), "READY result with error: {:?}", result);
    }

    pub fn assert_pending(result: &EnhancedAccessResult) {
        assert_eq!(
            result.readiness,
            ReadinessState::Pending,
            "Expected PENDING result, got {:?}",
            result
        );
    }

    /// Degraded with no access and an error containing `needle`.
    pub fn assert_degraded_with(result: &EnhancedAccessResult, needle: &str) {
        assert_eq!(
            result.readiness,
            ReadinessState::Degraded,
            "Expected DEGRADED result, got {:?}",
            result
        );
        assert!(result.access.is_none(), "Expected no access, got {:?}", result.access);
        let error = result.error.as_deref().unwrap_or_default();
        assert!(
            error.contains(needle),
            "Expected error containing {:?}, got {:?}",
            needle,
            error
        );
    }

    pub fn assert_from_cache(result: &EnhancedAccessResult, status: CacheStatus) {
        assert!(result.from_cache, "Expected cached result, got {:?}", result);
        assert_eq!(result.cache_status, status);
    }
}

// ============================================================================
// TESTS
// ============================================================================
