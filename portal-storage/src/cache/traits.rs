//! Key-value store trait and cache statistics.

use async_trait::async_trait;
use portal_core::PortalResult;
use std::time::Duration;

/// Shared key-value store backing the edge and core network tiers.
///
/// Implementations own expiry: a value written with `ttl` must not be
/// returned by `get` once `ttl` has elapsed.
///
/// # Errors
///
/// Transport or storage failures come back as
/// [`portal_core::BackendError`]. The cache store treats any error as a miss
/// or a no-op, so implementations should not retry internally.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> PortalResult<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> PortalResult<()>;

    /// Delete keys. Returns how many existed.
    async fn del(&self, keys: &[String]) -> PortalResult<u64>;

    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups served by the edge tier (mirror or network).
    pub edge_hits: u64,
    /// Lookups served by the core tier.
    pub core_hits: u64,
    pub misses: u64,
    /// Results handed to callers that joined an in-flight resolution.
    pub coalesced: u64,
    /// Store reads or writes that failed and were treated as miss / no-op.
    pub backend_errors: u64,
    /// Mirror entries evicted for capacity.
    pub evictions: u64,
    /// Live entries currently held in the mirror.
    pub mirror_entries: u64,
}

impl CacheStats {
    /// Share of lookups served from either tier (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.edge_hits + self.core_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn lookups(&self) -> u64 {
        self.edge_hits + self.core_hits + self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio_empty() {
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio_counts_both_tiers() {
        let stats = CacheStats {
            edge_hits: 2,
            core_hits: 1,
            misses: 1,
            coalesced: 10,
            ..Default::default()
        };
        assert_eq!(stats.lookups(), 4);
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
