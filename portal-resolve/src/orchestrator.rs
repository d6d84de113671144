//! Resolution orchestrator.
//!
//! Composes the registry, the two-tier cache and the coalescing table into
//! one entry point, [`ResolutionOrchestrator::resolve_access_with_cache`]:
//!
//! ```text
//! LOOKUP ─┬─ in flight? ──────────────► COALESCE_JOIN ─┐
//!         ├─ cache hit? ──────────────► CACHE_HIT ─────┼──► RETURN
//!         └─ miss ──► RESOLVE_RACE (full vs budget) ───┘
//! ```
//!
//! The entry point never fails. Every failure is folded into the returned
//! [`EnhancedAccessResult`], and every return emits one resolution event.

use dashmap::{DashMap, DashSet};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use portal_core::{
    AccessContext, AccessKey, CacheStatus, ConfigError, EnhancedAccessResult, ManifestValidator,
    PortalError, PortalResult, ReadinessState, ResolveError, ResolveOptions, ResolverOutput,
    SchemaValidator, UrlPolicy,
};
use portal_storage::{CacheStats, CacheStore, KeyValueStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock as TokioRwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::background::{BackgroundExecutor, BackgroundStats};
use crate::coalescing::{CoalesceError, CoalescingStats, CoalescingTable};
use crate::config::EngineConfig;
use crate::fallback::budget_fallback;
use crate::registry::{AccessResolver, ResolverRegistry};
use crate::telemetry::{
    CacheHitEvent, CoalescedEvent, ListenerChain, ResolutionEvent, TelemetryListener,
};

// ============================================================================
// STATS
// ============================================================================

/// Snapshot of every engine component, for dashboards and alerting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    pub cache: CacheStats,
    pub coalescing: CoalescingStats,
    pub background: BackgroundStats,
}

/// What one maintenance pass cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// In-flight and detached entries dropped for exceeding the max age.
    pub swept: usize,
    /// Expired mirror entries purged.
    pub purged: usize,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Full resolution that lost its budget race and is still running.
type DetachedResolution = Shared<BoxFuture<'static, Result<EnhancedAccessResult, CoalesceError>>>;

struct Detached {
    running: DetachedResolution,
    started_at: Instant,
}

struct EngineInner {
    registry: ResolverRegistry,
    cache: CacheStore,
    coalescing: CoalescingTable<EnhancedAccessResult>,
    background: BackgroundExecutor,
    validator: Arc<dyn ManifestValidator>,
    policy: UrlPolicy,
    listeners: TokioRwLock<ListenerChain>,
    /// Keys with a background refresh scheduled or running.
    refreshing: DashSet<String>,
    /// Keys whose full resolution outlived its budget and is still running.
    detached: DashMap<String, Detached>,
    config: EngineConfig,
}

/// Removes a key from the refresh set however the refresh ends, including
/// when the executor rejects it and drops the future unpolled.
struct RefreshGuard {
    inner: Arc<EngineInner>,
    key: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.inner.refreshing.remove(&self.key);
    }
}

impl EngineInner {
    /// Race the full resolution against the budget.
    ///
    /// The full resolution runs as its own task. If the budget wins it keeps
    /// running under the background executor (or is aborted when
    /// `cancel_on_timeout` is set), and a success still warms the cache.
    /// While it runs, later resolutions of the key wait on it instead of
    /// calling the resolver again.
    async fn execute_resolution(
        self: Arc<Self>,
        ctx: AccessContext,
        key: AccessKey,
        budget: Duration,
        cancel_on_timeout: bool,
    ) -> EnhancedAccessResult {
        let running = self.detached.get(key.as_str()).map(|entry| entry.running.clone());
        if let Some(running) = running {
            return self.await_detached(&ctx, &key, running, budget).await;
        }

        let mut full = tokio::spawn(Arc::clone(&self).full_resolution(ctx.clone(), key.clone()));

        match tokio::time::timeout(budget, &mut full).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                let error = if e.is_panic() {
                    tracing::error!(item_type = %ctx.item_type, key = %key, "Resolver panicked");
                    ResolveError::ResolverPanicked {
                        item_type: ctx.item_type.clone(),
                    }
                } else {
                    ResolveError::ResolverFailed {
                        item_type: ctx.item_type.clone(),
                        reason: "resolution task cancelled".to_string(),
                    }
                };
                EnhancedAccessResult::from_error(&PortalError::from(error))
            }
            Err(_) => {
                tracing::debug!(
                    item_type = %ctx.item_type,
                    key = %key,
                    budget_ms = budget.as_millis() as u64,
                    cancelled = cancel_on_timeout,
                    "Resolution budget exceeded, serving fallback"
                );
                if cancel_on_timeout {
                    full.abort();
                } else {
                    Arc::clone(&self).detach(&key, full);
                }
                budget_fallback(&ctx, budget, self.validator.as_ref(), &self.policy)
            }
        }
    }

    /// Register a budget-race loser under its key and hand it to the
    /// background executor. The key is released when it finishes.
    fn detach(self: Arc<Self>, key: &AccessKey, full: JoinHandle<EnhancedAccessResult>) {
        let running: DetachedResolution = async move {
            full.await.map_err(|e| {
                if e.is_panic() {
                    CoalesceError::Panicked
                } else {
                    CoalesceError::Cancelled
                }
            })
        }
        .boxed()
        .shared();
        let label = key.as_str().to_string();
        self.detached.insert(
            label.clone(),
            Detached {
                running: running.clone(),
                started_at: Instant::now(),
            },
        );

        let inner = Arc::clone(&self);
        let watcher = tokio::spawn(async move {
            let marker = running.clone();
            let outcome = running.await;
            inner
                .detached
                .remove_if(&label, |_, current| current.running.ptr_eq(&marker));
            outcome
        });

        self.background.track("budget_race", key.as_str(), watcher, |outcome| match outcome {
            Ok(result) if result.readiness == ReadinessState::Ready => Ok(()),
            Ok(result) => Err(result
                .error
                .unwrap_or_else(|| "resolution did not produce a manifest".to_string())),
            Err(e) => Err(e.to_string()),
        });
    }

    /// Wait, within `budget`, for the detached resolution of `key`.
    async fn await_detached(
        &self,
        ctx: &AccessContext,
        key: &AccessKey,
        running: DetachedResolution,
        budget: Duration,
    ) -> EnhancedAccessResult {
        match tokio::time::timeout(budget, running).await {
            Ok(outcome) => settle(ctx, outcome).as_coalesced(),
            Err(_) => {
                tracing::debug!(
                    key = %key,
                    budget_ms = budget.as_millis() as u64,
                    "Detached resolution still running, serving fallback"
                );
                budget_fallback(ctx, budget, self.validator.as_ref(), &self.policy).as_coalesced()
            }
        }
    }

    async fn full_resolution(self: Arc<Self>, ctx: AccessContext, key: AccessKey) -> EnhancedAccessResult {
        match self.try_resolve(&ctx, &key).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    item_type = %ctx.item_type,
                    source = %ctx.source,
                    error = %e,
                    "Access resolution degraded"
                );
                EnhancedAccessResult::from_error(&e)
            }
        }
    }

    /// Resolve, validate, police and write through.
    async fn try_resolve(&self, ctx: &AccessContext, key: &AccessKey) -> PortalResult<EnhancedAccessResult> {
        let resolver = self
            .registry
            .get(&ctx.item_type)
            .ok_or_else(|| ResolveError::NoResolver {
                item_type: ctx.item_type.clone(),
            })?;

        let ResolverOutput { access, error } =
            resolver
                .resolve(ctx)
                .await
                .map_err(|e| match e {
                    PortalError::Resolve(ResolveError::ResolverPanicked { .. }) => e,
                    other => PortalError::from(ResolveError::ResolverFailed {
                        item_type: ctx.item_type.clone(),
                        reason: other.to_string(),
                    }),
                })?;

        let Some(access) = access else {
            let message = error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| {
                    ResolveError::EmptyManifest {
                        item_type: ctx.item_type.clone(),
                    }
                    .to_string()
                });
            tracing::debug!(item_type = %ctx.item_type, error = %message, "Resolver returned no manifest");
            return Ok(EnhancedAccessResult::degraded(message));
        };

        self.validator.validate(&access)?;
        self.policy.check(&access)?;

        let ttl = self.cache.store(key, &access).await;
        Ok(EnhancedAccessResult::ready(access, ttl))
    }
}

/// Builder for a [`ResolutionOrchestrator`].
pub struct OrchestratorBuilder {
    kv: Arc<dyn KeyValueStore>,
    config: EngineConfig,
    validator: Arc<dyn ManifestValidator>,
    listeners: Vec<Arc<dyn TelemetryListener>>,
}

impl OrchestratorBuilder {
    fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            config: EngineConfig::default(),
            validator: Arc::new(SchemaValidator::new()),
            listeners: Vec::new(),
        }
    }

    /// Set the engine configuration (default: [`EngineConfig::default`]).
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the manifest validator (default: [`SchemaValidator`]).
    pub fn validator(mut self, validator: Arc<dyn ManifestValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Add a telemetry listener.
    pub fn listener(mut self, listener: Arc<dyn TelemetryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Build the orchestrator; fails if any config section is invalid.
    pub fn build(self) -> Result<ResolutionOrchestrator, ConfigError> {
        self.config.validate()?;
        let cache = CacheStore::new(self.kv, self.config.cache.clone())?;
        let policy = UrlPolicy::new(self.config.policy.clone())?;

        let mut chain = ListenerChain::new();
        for listener in self.listeners {
            chain.add(listener);
        }

        tracing::info!(
            region = %self.config.cache.region,
            budget_ms = self.config.default_budget.as_millis() as u64,
            background_max_concurrent = self.config.background.max_concurrent,
            "Resolution orchestrator built"
        );

        Ok(ResolutionOrchestrator {
            inner: Arc::new(EngineInner {
                registry: ResolverRegistry::new(),
                cache,
                coalescing: CoalescingTable::new(self.config.coalescing.clone()),
                background: BackgroundExecutor::new(self.config.background.clone()),
                validator: self.validator,
                policy,
                listeners: TokioRwLock::new(chain),
                refreshing: DashSet::new(),
                detached: DashMap::new(),
                config: self.config,
            }),
        })
    }
}

/// Process-wide access resolution service. Cheap to clone.
#[derive(Clone)]
pub struct ResolutionOrchestrator {
    inner: Arc<EngineInner>,
}

impl ResolutionOrchestrator {
    pub fn builder(kv: Arc<dyn KeyValueStore>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(kv)
    }

    /// Orchestrator over `kv` with the given configuration.
    pub fn new(kv: Arc<dyn KeyValueStore>, config: EngineConfig) -> Result<Self, ConfigError> {
        Self::builder(kv).config(config).build()
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Register the resolver for an item type, replacing any previous one.
    pub fn register_resolver(&self, item_type: &str, resolver: Arc<dyn AccessResolver>) {
        self.inner.registry.register_resolver(item_type, resolver);
    }

    /// Register a synchronous resolver function.
    pub fn register_fn<F>(&self, item_type: &str, f: F)
    where
        F: Fn(&AccessContext) -> PortalResult<ResolverOutput> + Send + Sync + 'static,
    {
        self.inner.registry.register_fn(item_type, f);
    }

    pub fn unregister_resolver(&self, item_type: &str) -> bool {
        self.inner.registry.unregister(item_type).is_some()
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.inner.registry
    }

    pub async fn add_listener(&self, listener: Arc<dyn TelemetryListener>) {
        self.inner.listeners.write().await.add(listener);
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Resolve with default options and the configured default budget.
    pub async fn resolve(&self, ctx: &AccessContext) -> EnhancedAccessResult {
        let opts = ResolveOptions::new().with_budget(self.inner.config.default_budget);
        self.resolve_access_with_cache(ctx, opts).await
    }

    /// Resolve `ctx` through the coalescing table and the cache.
    ///
    /// 1. Unless `force_refresh`, join a resolution already in flight for
    ///    the key. The join is bounded by the caller's budget.
    /// 2. Unless the cache is bypassed, serve a cache hit. A degraded hit
    ///    schedules one background refresh for the key.
    /// 3. Otherwise start (or join) the budget-raced resolution.
    pub async fn resolve_access_with_cache(
        &self,
        ctx: &AccessContext,
        opts: ResolveOptions,
    ) -> EnhancedAccessResult {
        let started = Instant::now();
        let resolution_id = Uuid::now_v7();
        let key = self.inner.cache.key_for(ctx);

        let mut join_timed_out = false;
        if !opts.force_refresh {
            match tokio::time::timeout(opts.budget, self.inner.coalescing.join_existing(key.as_str())).await {
                Ok(Some(joined)) => {
                    let result = self.coalesced_result(resolution_id, ctx, &key, joined).await;
                    return self.finish(resolution_id, ctx, result, started).await;
                }
                Ok(None) => {}
                Err(_) => {
                    tracing::debug!(
                        key = %key,
                        budget_ms = opts.budget.as_millis() as u64,
                        "In-flight resolution outlasted caller budget"
                    );
                    join_timed_out = true;
                }
            }
        }

        if !opts.bypasses_cache() {
            if let Some(entry) = self.inner.cache.lookup(&key).await {
                self.inner
                    .listeners
                    .read()
                    .await
                    .emit_cache_hit(CacheHitEvent {
                        resolution_id,
                        item_type: ctx.normalized_item_type(),
                        source: ctx.source.clone(),
                        tier: entry.tier,
                        state: entry.state,
                        ttl_ms: entry.ttl_ms,
                        timestamp: chrono::Utc::now(),
                    })
                    .await;

                if entry.state == ReadinessState::Degraded && !join_timed_out {
                    self.schedule_refresh(ctx, &key);
                }
                let result = EnhancedAccessResult::from_entry(entry);
                return self.finish(resolution_id, ctx, result, started).await;
            }
        }

        if join_timed_out {
            let result = budget_fallback(ctx, opts.budget, self.inner.validator.as_ref(), &self.inner.policy)
                .as_coalesced();
            return self.finish(resolution_id, ctx, result, started).await;
        }

        let status = if opts.bypasses_cache() {
            CacheStatus::Bypass
        } else {
            CacheStatus::Miss
        };

        let inner = &self.inner;
        let (outcome, coalesced) = inner
            .coalescing
            .join(key.as_str(), || {
                Arc::clone(inner).execute_resolution(
                    ctx.clone(),
                    key.clone(),
                    opts.budget,
                    opts.cancel_on_timeout,
                )
            })
            .await;

        let result = if coalesced {
            self.coalesced_result(resolution_id, ctx, &key, outcome).await
        } else {
            let result = settle(ctx, outcome);
            if result.coalesced {
                // Served by a detached resolution of the same key.
                self.coalesced_result(resolution_id, ctx, &key, Ok(result)).await
            } else {
                result.with_cache_status(status)
            }
        };
        self.finish(resolution_id, ctx, result, started).await
    }

    /// Remove `ctx` from every cache tier.
    pub async fn invalidate(&self, ctx: &AccessContext) {
        self.inner.cache.invalidate(ctx).await;
    }

    /// Schedule a background refresh for `key` unless one is already
    /// scheduled. Returns whether a refresh was scheduled.
    fn schedule_refresh(&self, ctx: &AccessContext, key: &AccessKey) -> bool {
        if !self.inner.refreshing.insert(key.as_str().to_string()) {
            return false;
        }

        let guard = RefreshGuard {
            inner: Arc::clone(&self.inner),
            key: key.as_str().to_string(),
        };
        let inner = Arc::clone(&self.inner);
        let ctx = ctx.clone();
        let label = key.as_str().to_string();
        let key = key.clone();
        let budget = self.inner.config.background_budget;

        let work = async move {
            let _guard = guard;
            let (outcome, _) = inner
                .coalescing
                .join(key.as_str(), || {
                    Arc::clone(&inner).execute_resolution(ctx, key.clone(), budget, false)
                })
                .await;
            match outcome {
                Ok(result) if result.readiness == ReadinessState::Ready => Ok(()),
                Ok(result) => Err(result
                    .error
                    .unwrap_or_else(|| "refresh did not produce a fresh manifest".to_string())),
                Err(e) => Err(e.to_string()),
            }
        };

        let submitted = self.inner.background.submit("swr_refresh", label.clone(), work);
        if submitted {
            tracing::debug!(key = %label, "Scheduled stale-while-revalidate refresh");
        }
        submitted
    }

    async fn coalesced_result(
        &self,
        resolution_id: Uuid,
        ctx: &AccessContext,
        key: &AccessKey,
        outcome: Result<EnhancedAccessResult, CoalesceError>,
    ) -> EnhancedAccessResult {
        self.inner.cache.record_coalesced();
        self.inner
            .listeners
            .read()
            .await
            .emit_coalesced(CoalescedEvent {
                resolution_id,
                item_type: ctx.normalized_item_type(),
                source: ctx.source.clone(),
                key: key.as_str().to_string(),
                timestamp: chrono::Utc::now(),
            })
            .await;
        settle(ctx, outcome).as_coalesced()
    }

    async fn finish(
        &self,
        resolution_id: Uuid,
        ctx: &AccessContext,
        result: EnhancedAccessResult,
        started: Instant,
    ) -> EnhancedAccessResult {
        let result = result.with_latency(started.elapsed());
        let event = ResolutionEvent::new(resolution_id, ctx, &result);
        self.inner.listeners.read().await.emit_resolution(event).await;
        result
    }

    // ------------------------------------------------------------------------
    // Maintenance and stats
    // ------------------------------------------------------------------------

    /// Sweep over-age in-flight entries and purge expired mirror entries.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        MaintenanceReport {
            swept: self.inner.coalescing.sweep() + self.release_stuck_detached(),
            purged: self.inner.cache.purge_expired(),
        }
    }

    /// Forget detached resolutions older than the coalescing max age so a
    /// hung upstream cannot pin its key. The tasks themselves keep running.
    fn release_stuck_detached(&self) -> usize {
        let max_age = self.inner.config.coalescing.max_age;
        let before = self.inner.detached.len();
        self.inner
            .detached
            .retain(|_, detached| detached.started_at.elapsed() <= max_age);
        let released = before.saturating_sub(self.inner.detached.len());
        if released > 0 {
            tracing::warn!(
                count = released,
                max_age_secs = max_age.as_secs(),
                "Released detached resolutions past max age"
            );
        }
        released
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cache: self.inner.cache.stats(),
            coalescing: self.inner.coalescing.stats(),
            background: self.inner.background.stats(),
        }
    }

    /// Number of keys with a background refresh scheduled or running.
    pub fn refreshes_in_flight(&self) -> usize {
        self.inner.refreshing.len()
    }

    /// Number of keys whose full resolution outlived its budget and is
    /// still running.
    pub fn detached_in_flight(&self) -> usize {
        self.inner.detached.len()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn coalescing(&self) -> &CoalescingTable<EnhancedAccessResult> {
        &self.inner.coalescing
    }

    pub fn background(&self) -> &BackgroundExecutor {
        &self.inner.background
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ResolutionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionOrchestrator")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Unwrap a shared coalescing outcome into a caller result.
fn settle(ctx: &AccessContext, outcome: Result<EnhancedAccessResult, CoalesceError>) -> EnhancedAccessResult {
    match outcome {
        Ok(result) => result,
        Err(CoalesceError::Panicked) => EnhancedAccessResult::from_error(&PortalError::from(
            ResolveError::ResolverPanicked {
                item_type: ctx.item_type.clone(),
            },
        )),
        Err(e) => EnhancedAccessResult::degraded(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::{AccessManifest, ResolutionOutcome};
    use portal_storage::InMemoryKvStore;

    /// Longer than the development coalescing grace period.
    const PAST_GRACE: Duration = Duration::from_millis(120);

    fn orchestrator() -> ResolutionOrchestrator {
        ResolutionOrchestrator::new(Arc::new(InMemoryKvStore::new()), EngineConfig::development())
            .expect("development config should be valid")
    }

    fn web(ctx: &AccessContext) -> PortalResult<ResolverOutput> {
        Ok(ResolverOutput::found(AccessManifest::open_web(
            ctx.url.clone().unwrap_or_default(),
        )))
    }

    #[tokio::test]
    async fn test_no_resolver_message() {
        let engine = orchestrator();
        let result = engine
            .resolve(&AccessContext::new("hologram", "lab").with_url("https://example.org/h"))
            .await;
        assert!(result.access.is_none());
        assert_eq!(result.readiness, ReadinessState::Degraded);
        assert_eq!(result.error.as_deref(), Some("No resolver for item type: hologram"));
        assert_eq!(result.outcome(), ResolutionOutcome::Failed);
    }

    #[tokio::test]
    async fn test_miss_then_edge_hit() {
        let engine = orchestrator();
        engine.register_fn("ebook", web);
        let ctx = AccessContext::new("ebook", "feed").with_url("https://books.example.org/1");

        let first = engine.resolve(&ctx).await;
        assert_eq!(first.readiness, ReadinessState::Ready);
        assert_eq!(first.cache_status, CacheStatus::Miss);
        assert!(!first.from_cache);

        tokio::time::sleep(PAST_GRACE).await;
        let second = engine.resolve(&ctx).await;
        assert!(second.from_cache);
        assert_eq!(second.cache_status, CacheStatus::EdgeHit);
        assert_eq!(second.access, first.access);

        let stats = engine.stats();
        assert_eq!(stats.cache.misses, 1);
        assert_eq!(stats.cache.edge_hits, 1);
    }

    #[tokio::test]
    async fn test_resolver_error_is_degraded_and_not_cached() {
        let engine = orchestrator();
        engine.register_fn("audio", |_ctx: &AccessContext| Ok(ResolverOutput::not_found("track removed")));
        let ctx = AccessContext::new("audio", "feed").with_provider_id("t-1");

        let result = engine.resolve(&ctx).await;
        assert_eq!(result.readiness, ReadinessState::Degraded);
        assert_eq!(result.error.as_deref(), Some("track removed"));

        assert!(engine.cache().get(&ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_output_uses_default_message() {
        let engine = orchestrator();
        engine.register_fn("app", |_ctx: &AccessContext| Ok(ResolverOutput::default()));
        let result = engine
            .resolve(&AccessContext::new("app", "store").with_provider_id("a"))
            .await;
        assert_eq!(
            result.error.as_deref(),
            Some("Resolver for item type app returned no access manifest")
        );
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_resolution() {
        let engine = orchestrator();
        engine.register_fn("ebook", web);
        let ctx = AccessContext::new("ebook", "feed").with_url("https://books.example.org/2");

        engine.resolve(&ctx).await;
        engine.invalidate(&ctx).await;
        tokio::time::sleep(PAST_GRACE).await;
        let again = engine.resolve(&ctx).await;
        assert!(!again.from_cache);
        assert_eq!(engine.stats().cache.misses, 2);
    }

    #[tokio::test]
    async fn test_unregister_resolver() {
        let engine = orchestrator();
        engine.register_fn("ebook", web);
        assert!(engine.unregister_resolver("EBOOK"));
        assert!(!engine.unregister_resolver("ebook"));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = EngineConfig::default().with_default_budget(Duration::ZERO);
        let built = ResolutionOrchestrator::builder(Arc::new(InMemoryKvStore::new()))
            .config(config)
            .build();
        assert!(built.is_err());
    }
}
