//! Two-tier access cache.
//!
//! Reads check the in-process edge mirror, then the edge and core network
//! keys in parallel. Writes go to both tiers concurrently with independent
//! TTLs and refresh the mirror from the edge write.
//!
//! Store failures never escape: they are logged, counted in
//! `backend_errors`, and behave as a miss (reads) or a no-op (writes).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use portal_core::{
    AccessContext, AccessKey, AccessManifest, CacheEntry, CacheTier, ConfigError, PortalResult,
    ReadinessState, DEFAULT_CORE_TTL_SECS, DEFAULT_EDGE_TTL_MAX_SECS, DEFAULT_EDGE_TTL_MIN_SECS,
    DEFAULT_KEY_MAX_LEN, DEFAULT_MIRROR_CAPACITY, DEFAULT_REGION, DEFAULT_SWR_WINDOW_SECS,
    MIN_KEY_MAX_LEN,
};

use super::mirror::EdgeMirror;
use super::traits::{CacheStats, KeyValueStore};
use super::ttl::TtlPolicy;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the two-tier cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Region component of every cache key (default: "global")
    pub region: String,
    /// Lower bound of the jittered edge TTL (default: 60s)
    pub edge_ttl_min: Duration,
    /// Exclusive upper bound of the jittered edge TTL (default: 120s)
    pub edge_ttl_max: Duration,
    /// Core tier TTL (default: 600s)
    pub core_ttl: Duration,
    /// Tail of the core TTL served as degraded (default: 30s)
    pub swr_window: Duration,
    /// Maximum in-process mirror entries (default: 10000)
    pub mirror_capacity: usize,
    /// Maximum normalized key body length (default: 200)
    pub key_max_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            edge_ttl_min: Duration::from_secs(DEFAULT_EDGE_TTL_MIN_SECS),
            edge_ttl_max: Duration::from_secs(DEFAULT_EDGE_TTL_MAX_SECS),
            core_ttl: Duration::from_secs(DEFAULT_CORE_TTL_SECS),
            swr_window: Duration::from_secs(DEFAULT_SWR_WINDOW_SECS),
            mirror_capacity: DEFAULT_MIRROR_CAPACITY,
            key_max_len: DEFAULT_KEY_MAX_LEN,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `PORTAL_REGION`: Key region (default: global)
    /// - `PORTAL_EDGE_TTL_MIN_SECS`: Edge TTL lower bound (default: 60)
    /// - `PORTAL_EDGE_TTL_MAX_SECS`: Edge TTL upper bound (default: 120)
    /// - `PORTAL_CORE_TTL_SECS`: Core TTL (default: 600)
    /// - `PORTAL_SWR_WINDOW_SECS`: Stale-while-revalidate window (default: 30)
    /// - `PORTAL_MIRROR_CAPACITY`: Mirror capacity (default: 10000)
    /// - `PORTAL_KEY_MAX_LEN`: Key body length cap (default: 200)
    pub fn from_env() -> Self {
        let region = std::env::var("PORTAL_REGION")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Self {
            region,
            edge_ttl_min: Duration::from_secs(env_parse(
                "PORTAL_EDGE_TTL_MIN_SECS",
                DEFAULT_EDGE_TTL_MIN_SECS,
            )),
            edge_ttl_max: Duration::from_secs(env_parse(
                "PORTAL_EDGE_TTL_MAX_SECS",
                DEFAULT_EDGE_TTL_MAX_SECS,
            )),
            core_ttl: Duration::from_secs(env_parse("PORTAL_CORE_TTL_SECS", DEFAULT_CORE_TTL_SECS)),
            swr_window: Duration::from_secs(env_parse(
                "PORTAL_SWR_WINDOW_SECS",
                DEFAULT_SWR_WINDOW_SECS,
            )),
            mirror_capacity: env_parse("PORTAL_MIRROR_CAPACITY", DEFAULT_MIRROR_CAPACITY),
            key_max_len: env_parse("PORTAL_KEY_MAX_LEN", DEFAULT_KEY_MAX_LEN),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_edge_ttl(mut self, min: Duration, max: Duration) -> Self {
        self.edge_ttl_min = min;
        self.edge_ttl_max = max;
        self
    }

    pub fn with_core_ttl(mut self, ttl: Duration) -> Self {
        self.core_ttl = ttl;
        self
    }

    pub fn with_swr_window(mut self, window: Duration) -> Self {
        self.swr_window = window;
        self
    }

    pub fn with_mirror_capacity(mut self, capacity: usize) -> Self {
        self.mirror_capacity = capacity;
        self
    }

    pub fn with_key_max_len(mut self, len: usize) -> Self {
        self.key_max_len = len;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "region".to_string(),
            });
        }
        if self.edge_ttl_min.is_zero() || self.edge_ttl_max.is_zero() {
            return Err(invalid("edge_ttl", format!("{:?}..{:?}", self.edge_ttl_min, self.edge_ttl_max), "must be positive"));
        }
        if self.edge_ttl_min > self.edge_ttl_max {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "edge_ttl_min".to_string(),
                option_b: "edge_ttl_max".to_string(),
            });
        }
        if self.swr_window >= self.core_ttl {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "swr_window".to_string(),
                option_b: "core_ttl".to_string(),
            });
        }
        if self.mirror_capacity == 0 {
            return Err(invalid("mirror_capacity", "0".to_string(), "must be positive"));
        }
        if self.key_max_len < MIN_KEY_MAX_LEN {
            return Err(invalid(
                "key_max_len",
                self.key_max_len.to_string(),
                &format!("must be at least {}", MIN_KEY_MAX_LEN),
            ));
        }
        Ok(())
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(
            self.edge_ttl_min,
            self.edge_ttl_max,
            self.core_ttl,
            self.swr_window,
        )
    }
}

fn invalid(field: &str, value: String, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// CACHE STORE
// ============================================================================

#[derive(Debug, Default)]
struct CacheCounters {
    edge_hits: AtomicU64,
    core_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    backend_errors: AtomicU64,
}

/// Two-tier cache over a shared [`KeyValueStore`].
pub struct CacheStore {
    config: CacheConfig,
    ttl: TtlPolicy,
    mirror: EdgeMirror,
    kv: Arc<dyn KeyValueStore>,
    counters: CacheCounters,
}

impl CacheStore {
    /// Create a cache store; fails if the config is invalid.
    pub fn new(kv: Arc<dyn KeyValueStore>, config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(kv, config))
    }

    /// Create a cache store with the default configuration.
    pub fn with_defaults(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::from_validated(kv, CacheConfig::default())
    }

    fn from_validated(kv: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self {
            ttl: config.ttl_policy(),
            mirror: EdgeMirror::new(config.mirror_capacity),
            kv,
            counters: CacheCounters::default(),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// The shared store behind the network tiers.
    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    pub fn key_for(&self, ctx: &AccessContext) -> AccessKey {
        AccessKey::derive(&self.config.region, ctx, self.config.key_max_len)
    }

    /// Look up `ctx`. See [`CacheStore::lookup`].
    pub async fn get(&self, ctx: &AccessContext) -> Option<CacheEntry> {
        self.lookup(&self.key_for(ctx)).await
    }

    /// Write a resolved manifest for `ctx`. See [`CacheStore::store`].
    pub async fn set(&self, ctx: &AccessContext, access: &AccessManifest) -> Duration {
        self.store(&self.key_for(ctx), access).await
    }

    /// Remove `ctx` from every tier.
    pub async fn invalidate(&self, ctx: &AccessContext) {
        self.remove(&self.key_for(ctx)).await
    }

    /// Read an entry, with `state`, `ttl_ms` and `tier` describing it as of now.
    ///
    /// Edge hits are always ready. Core hits are degraded once older than
    /// `core_ttl - swr_window`.
    pub async fn lookup(&self, key: &AccessKey) -> Option<CacheEntry> {
        if let Some(hit) = self.mirror.get(key.as_str()) {
            self.counters.edge_hits.fetch_add(1, Ordering::Relaxed);
            return Some(as_edge_hit(hit.entry, hit.remaining));
        }

        let edge_key = key.edge_key();
        let core_key = key.core_key();
        let (edge, core) = tokio::join!(self.kv.get(&edge_key), self.kv.get(&core_key));

        if let Some(entry) = self.decode(&edge_key, edge) {
            let remaining = Duration::from_millis(entry.ttl_ms).saturating_sub(entry.age());
            if !remaining.is_zero() {
                self.mirror.insert(key.as_str(), entry.clone(), remaining);
                self.counters.edge_hits.fetch_add(1, Ordering::Relaxed);
                return Some(as_edge_hit(entry, remaining));
            }
        }

        if let Some(mut entry) = self.decode(&core_key, core) {
            if let Some(freshness) = self.ttl.core_freshness(entry.age()) {
                entry.state = freshness.state;
                entry.ttl_ms = freshness.remaining.as_millis() as u64;
                entry.tier = CacheTier::Core;
                self.counters.core_hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write both tiers concurrently and refresh the mirror.
    ///
    /// Returns the jittered edge TTL that was applied.
    pub async fn store(&self, key: &AccessKey, access: &AccessManifest) -> Duration {
        let edge_ttl = self.ttl.edge_ttl();
        let core_ttl = self.ttl.core_ttl();

        let edge_entry = CacheEntry::fresh(access.clone(), CacheTier::Edge, edge_ttl);
        let core_entry = CacheEntry {
            tier: CacheTier::Core,
            ttl_ms: core_ttl.as_millis() as u64,
            ..edge_entry.clone()
        };

        let edge_key = key.edge_key();
        let core_key = key.core_key();
        match (serde_json::to_vec(&edge_entry), serde_json::to_vec(&core_entry)) {
            (Ok(edge_bytes), Ok(core_bytes)) => {
                let (edge, core) = tokio::join!(
                    self.kv.set(&edge_key, edge_bytes, edge_ttl),
                    self.kv.set(&core_key, core_bytes, core_ttl),
                );
                self.check_write(&edge_key, edge);
                self.check_write(&core_key, core);
            }
            (Err(e), _) | (_, Err(e)) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Failed to encode cache entry");
            }
        }

        self.mirror.insert(key.as_str(), edge_entry, edge_ttl);
        edge_ttl
    }

    /// Remove a key from the mirror and both network tiers.
    pub async fn remove(&self, key: &AccessKey) {
        self.mirror.remove(key.as_str());
        let keys = [key.edge_key(), key.core_key()];
        match self.kv.del(&keys).await {
            Ok(deleted) => tracing::debug!(key = %key, deleted, "Invalidated cache entry"),
            Err(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, backend = self.kv.name(), error = %e, "Cache invalidation failed");
            }
        }
    }

    /// Count a result served to a coalesced caller.
    pub fn record_coalesced(&self) {
        self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop expired mirror entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.mirror.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            edge_hits: self.counters.edge_hits.load(Ordering::Relaxed),
            core_hits: self.counters.core_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            backend_errors: self.counters.backend_errors.load(Ordering::Relaxed),
            evictions: self.mirror.evictions(),
            mirror_entries: self.mirror.len() as u64,
        }
    }

    fn decode(&self, key: &str, read: PortalResult<Option<Vec<u8>>>) -> Option<CacheEntry> {
        let bytes = match read {
            Ok(bytes) => bytes?,
            Err(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, backend = self.kv.name(), error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.access.is_some() => Some(entry),
            Ok(_) => None,
            Err(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, error = %e, "Undecodable cache entry, treating as miss");
                None
            }
        }
    }

    fn check_write(&self, key: &str, result: PortalResult<()>) {
        if let Err(e) = result {
            self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key, backend = self.kv.name(), error = %e, "Cache write failed, skipping");
        }
    }
}

fn as_edge_hit(mut entry: CacheEntry, remaining: Duration) -> CacheEntry {
    entry.state = ReadinessState::Ready;
    entry.ttl_ms = remaining.as_millis() as u64;
    entry.tier = CacheTier::Edge;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryKvStore;
    use chrono::Utc;

    fn ctx() -> AccessContext {
        AccessContext::new("video", "catalog").with_url("https://youtube.com/watch?v=abc123")
    }

    fn manifest() -> AccessManifest {
        AccessManifest::embed("html", "https://www.youtube.com/embed/abc123")
            .with_open_web("https://youtube.com/watch?v=abc123")
    }

    fn store() -> (CacheStore, Arc<InMemoryKvStore>) {
        let kv = Arc::new(InMemoryKvStore::new());
        (CacheStore::with_defaults(kv.clone()), kv)
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        assert!(CacheConfig::default()
            .with_edge_ttl(Duration::from_secs(120), Duration::from_secs(60))
            .validate()
            .is_err());
        assert!(CacheConfig::default()
            .with_swr_window(Duration::from_secs(600))
            .validate()
            .is_err());
        assert!(CacheConfig::default().with_mirror_capacity(0).validate().is_err());
        assert!(CacheConfig::default().with_key_max_len(8).validate().is_err());
        assert!(CacheConfig::default().with_region(" ").validate().is_err());
    }

    #[test]
    fn test_with_defaults_matches_validated_defaults() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let defaults = CacheStore::with_defaults(Arc::clone(&kv));
        let validated = CacheStore::new(kv, CacheConfig::default()).unwrap();
        assert_eq!(defaults.config(), validated.config());
        assert_eq!(defaults.ttl_policy(), validated.ttl_policy());
        assert_eq!(defaults.mirror.capacity(), validated.mirror.capacity());
    }

    #[tokio::test]
    async fn test_round_trip_hits_mirror() {
        let (cache, _kv) = store();
        assert!(cache.get(&ctx()).await.is_none());

        let edge_ttl = cache.set(&ctx(), &manifest()).await;
        assert!(edge_ttl >= Duration::from_secs(60) && edge_ttl < Duration::from_secs(120));

        let entry = cache.get(&ctx()).await.unwrap();
        assert_eq!(entry.tier, CacheTier::Edge);
        assert_eq!(entry.state, ReadinessState::Ready);
        assert_eq!(entry.access, Some(manifest()));
        assert!(entry.ttl_ms <= edge_ttl.as_millis() as u64);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.edge_hits, 1);
        assert_eq!(stats.mirror_entries, 1);
    }

    #[tokio::test]
    async fn test_writes_both_network_tiers() {
        let (cache, kv) = store();
        let key = cache.key_for(&ctx());
        cache.store(&key, &manifest()).await;

        let edge: CacheEntry =
            serde_json::from_slice(&kv.get(&key.edge_key()).await.unwrap().unwrap()).unwrap();
        let core: CacheEntry =
            serde_json::from_slice(&kv.get(&key.core_key()).await.unwrap().unwrap()).unwrap();
        assert_eq!(edge.tier, CacheTier::Edge);
        assert_eq!(core.tier, CacheTier::Core);
        assert_eq!(core.ttl_ms, 600_000);
        assert_eq!(edge.access, core.access);
    }

    #[tokio::test]
    async fn test_network_edge_hit_refreshes_mirror() {
        let kv = Arc::new(InMemoryKvStore::new());
        let writer = CacheStore::with_defaults(kv.clone());
        let reader = CacheStore::with_defaults(kv.clone());
        writer.set(&ctx(), &manifest()).await;

        let entry = reader.get(&ctx()).await.unwrap();
        assert_eq!(entry.tier, CacheTier::Edge);
        assert_eq!(reader.stats().mirror_entries, 1);
    }

    #[tokio::test]
    async fn test_core_hit_degrades_inside_swr_window() {
        let (cache, kv) = store();
        let key = cache.key_for(&ctx());

        let mut aged = CacheEntry::fresh(manifest(), CacheTier::Core, Duration::from_secs(600));
        aged.timestamp = Utc::now() - chrono::Duration::seconds(580);
        kv.set(
            &key.core_key(),
            serde_json::to_vec(&aged).unwrap(),
            Duration::from_secs(20),
        )
        .await
        .unwrap();

        let entry = cache.lookup(&key).await.unwrap();
        assert_eq!(entry.tier, CacheTier::Core);
        assert_eq!(entry.state, ReadinessState::Degraded);
        assert!(entry.ttl_ms <= 20_000);
        assert_eq!(cache.stats().core_hits, 1);
    }

    #[tokio::test]
    async fn test_young_core_entry_is_ready() {
        let (cache, kv) = store();
        let key = cache.key_for(&ctx());

        let mut entry = CacheEntry::fresh(manifest(), CacheTier::Core, Duration::from_secs(600));
        entry.timestamp = Utc::now() - chrono::Duration::seconds(200);
        kv.set(&key.core_key(), serde_json::to_vec(&entry).unwrap(), Duration::from_secs(400))
            .await
            .unwrap();

        let hit = cache.lookup(&key).await.unwrap();
        assert_eq!(hit.state, ReadinessState::Ready);
        assert!(hit.ttl_ms > 399_000 && hit.ttl_ms <= 400_000);
    }

    #[tokio::test]
    async fn test_invalidate_clears_every_tier() {
        let (cache, kv) = store();
        let key = cache.key_for(&ctx());
        cache.set(&ctx(), &manifest()).await;

        cache.invalidate(&ctx()).await;
        assert!(kv.get(&key.edge_key()).await.unwrap().is_none());
        assert!(kv.get(&key.core_key()).await.unwrap().is_none());
        assert!(cache.get(&ctx()).await.is_none());
    }

    #[tokio::test]
    async fn test_garbage_entry_is_a_miss() {
        let (cache, kv) = store();
        let key = cache.key_for(&ctx());
        kv.set(&key.edge_key(), b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.lookup(&key).await.is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.backend_errors, 1);
    }
}
