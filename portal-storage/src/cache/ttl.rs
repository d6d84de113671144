//! TTL and freshness policy for the two cache tiers.
//!
//! Edge TTLs are drawn uniformly from `[edge_min, edge_max)` so keys written
//! together do not expire together. Core entries are fresh until
//! `core_ttl - swr_window`, then degraded-but-servable until `core_ttl`.

use portal_core::ReadinessState;
use rand::Rng;
use std::time::Duration;

/// Freshness of a core entry at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreFreshness {
    pub state: ReadinessState,
    /// Remaining life before the core entry expires.
    pub remaining: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    edge_min: Duration,
    edge_max: Duration,
    core_ttl: Duration,
    swr_window: Duration,
}

impl TtlPolicy {
    pub fn new(edge_min: Duration, edge_max: Duration, core_ttl: Duration, swr_window: Duration) -> Self {
        Self {
            edge_min,
            edge_max,
            core_ttl,
            swr_window,
        }
    }

    /// Jittered edge TTL. Collapses to `edge_min` when the range is empty.
    pub fn edge_ttl(&self) -> Duration {
        let min = self.edge_min.as_millis() as u64;
        let max = self.edge_max.as_millis() as u64;
        if max <= min {
            return self.edge_min;
        }
        Duration::from_millis(rand::rng().random_range(min..max))
    }

    pub fn core_ttl(&self) -> Duration {
        self.core_ttl
    }

    /// Age after which a core entry is served as degraded.
    pub fn stale_after(&self) -> Duration {
        self.core_ttl.saturating_sub(self.swr_window)
    }

    /// Classify a core entry of the given age; `None` once it has expired.
    pub fn core_freshness(&self, age: Duration) -> Option<CoreFreshness> {
        if age >= self.core_ttl {
            return None;
        }
        let state = if age > self.stale_after() {
            ReadinessState::Degraded
        } else {
            ReadinessState::Ready
        };
        Some(CoreFreshness {
            state,
            remaining: self.core_ttl - age,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_policy() -> TtlPolicy {
        TtlPolicy::new(
            Duration::from_secs(60),
            Duration::from_secs(120),
            Duration::from_secs(600),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_core_freshness_boundaries() {
        let policy = default_policy();

        let fresh = policy.core_freshness(Duration::from_secs(10)).unwrap();
        assert_eq!(fresh.state, ReadinessState::Ready);
        assert_eq!(fresh.remaining, Duration::from_secs(590));

        let edge_of_window = policy.core_freshness(Duration::from_secs(570)).unwrap();
        assert_eq!(edge_of_window.state, ReadinessState::Ready);

        let stale = policy.core_freshness(Duration::from_secs(571)).unwrap();
        assert_eq!(stale.state, ReadinessState::Degraded);
        assert_eq!(stale.remaining, Duration::from_secs(29));

        assert!(policy.core_freshness(Duration::from_secs(600)).is_none());
    }

    #[test]
    fn test_edge_ttl_spreads_over_range() {
        let policy = default_policy();
        let samples: Vec<u64> = (0..2_000).map(|_| policy.edge_ttl().as_millis() as u64).collect();

        assert!(samples.iter().all(|ms| (60_000..120_000).contains(ms)));

        // Each quarter of the range should see roughly a quarter of samples.
        let mut buckets = [0usize; 4];
        for ms in &samples {
            buckets[((ms - 60_000) / 15_000) as usize] += 1;
        }
        for count in buckets {
            assert!(count > 350, "uneven jitter distribution: {:?}", buckets);
        }
    }

    #[test]
    fn test_degenerate_edge_range() {
        let policy = TtlPolicy::new(
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(600),
            Duration::from_secs(30),
        );
        assert_eq!(policy.edge_ttl(), Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn prop_edge_ttl_within_bounds(min in 1u64..10_000, span in 1u64..10_000) {
            let policy = TtlPolicy::new(
                Duration::from_millis(min),
                Duration::from_millis(min + span),
                Duration::from_secs(600),
                Duration::from_secs(30),
            );
            let ttl = policy.edge_ttl().as_millis() as u64;
            prop_assert!(ttl >= min && ttl < min + span);
        }

        #[test]
        fn prop_remaining_plus_age_is_core_ttl(age_ms in 0u64..600_000) {
            let policy = default_policy();
            let age = Duration::from_millis(age_ms);
            let freshness = policy.core_freshness(age).unwrap();
            prop_assert_eq!(freshness.remaining + age, Duration::from_secs(600));
        }
    }
}
