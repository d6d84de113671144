//! In-flight request coalescing.
//!
//! At most one resolution per key runs at a time. The first caller spawns
//! the work and every concurrent caller for the same key awaits the same
//! shared result.
//!
//! # Entry lifecycle
//!
//! ```text
//! start ──► running ──(work settles)──► settled ──(grace, no subscribers)──► removed
//!              │                                                  ▲
//!              └──────────────(older than max_age: sweep)─────────┘
//! ```
//!
//! Every mutation of an entry happens under the table mutex, so the
//! "decrement subscribers" and "is it removable" steps can never interleave
//! with another caller. Entries carry a generation id so a late grace timer
//! never removes a newer entry registered under the same key.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use portal_core::{
    ConfigError, DEFAULT_COALESCE_GRACE_MS, DEFAULT_COALESCE_MAX_AGE_SECS,
    DEFAULT_COALESCE_SWEEP_INTERVAL_SECS,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the coalescing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescingConfig {
    /// How long a settled entry stays joinable (default: 100ms)
    pub grace: Duration,
    /// Age after which the sweep drops an entry regardless of subscribers
    /// (default: 30s)
    pub max_age: Duration,
    /// How often the maintenance job sweeps (default: 10s)
    pub sweep_interval: Duration,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(DEFAULT_COALESCE_GRACE_MS),
            max_age: Duration::from_secs(DEFAULT_COALESCE_MAX_AGE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_COALESCE_SWEEP_INTERVAL_SECS),
        }
    }
}

impl CoalescingConfig {
    /// Create CoalescingConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `PORTAL_COALESCE_GRACE_MS`: Grace period after settle (default: 100)
    /// - `PORTAL_COALESCE_MAX_AGE_SECS`: Max in-flight age (default: 30)
    /// - `PORTAL_COALESCE_SWEEP_INTERVAL_SECS`: Sweep interval (default: 10)
    pub fn from_env() -> Self {
        let grace = Duration::from_millis(
            std::env::var("PORTAL_COALESCE_GRACE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COALESCE_GRACE_MS),
        );

        let max_age = Duration::from_secs(
            std::env::var("PORTAL_COALESCE_MAX_AGE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COALESCE_MAX_AGE_SECS),
        );

        let sweep_interval = Duration::from_secs(
            std::env::var("PORTAL_COALESCE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COALESCE_SWEEP_INTERVAL_SECS),
        );

        Self {
            grace,
            max_age,
            sweep_interval,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grace >= self.max_age {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "coalesce_grace".to_string(),
                option_b: "coalesce_max_age".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "coalesce_sweep_interval".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// Why a coalesced caller got no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoalesceError {
    #[error("In-flight resolution panicked")]
    Panicked,

    #[error("In-flight resolution was cancelled")]
    Cancelled,
}

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, CoalesceError>>>;

struct InFlight<T: Clone> {
    id: u64,
    shared: SharedOutcome<T>,
    started_at: Instant,
    subscribers: usize,
    settled_at: Option<Instant>,
}

/// Point-in-time view of the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoalescingStats {
    /// Keys with an in-flight (or grace-period) entry.
    pub in_flight: usize,
    /// Callers currently awaiting an entry.
    pub subscribers: usize,
    /// Age of the oldest entry.
    pub oldest_age: Option<Duration>,
    /// Resolutions started since creation.
    pub started: u64,
    /// Callers that joined an existing entry.
    pub joined: u64,
    /// Entries dropped by the max-age sweep.
    pub swept: u64,
}

struct TableInner<T: Clone> {
    entries: Mutex<HashMap<String, InFlight<T>>>,
    config: CoalescingConfig,
    next_id: AtomicU64,
    started: AtomicU64,
    joined: AtomicU64,
    swept: AtomicU64,
}

impl<T: Clone> TableInner<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, InFlight<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop one subscriber; remove the entry if it is done with.
    fn detach(&self, key: &str, id: u64) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.id != id {
            return;
        }
        entry.subscribers = entry.subscribers.saturating_sub(1);
        let grace_over = entry
            .settled_at
            .is_some_and(|at| at.elapsed() >= self.config.grace);
        if entry.subscribers == 0 && grace_over {
            entries.remove(key);
        }
    }

    /// Mark settled. Returns false if the entry is already gone.
    fn settle(&self, key: &str, id: u64) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.id == id => {
                entry.settled_at = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Grace timer: remove if still the same generation and unobserved.
    fn expire(&self, key: &str, id: u64) {
        let mut entries = self.lock();
        if entries
            .get(key)
            .is_some_and(|entry| entry.id == id && entry.subscribers == 0)
        {
            entries.remove(key);
        }
    }
}

/// Marks its entry settled when the spawned work finishes, panics included,
/// and schedules the grace-period removal.
struct SettleGuard<T: Clone + Send + Sync + 'static> {
    table: Weak<TableInner<T>>,
    key: String,
    id: u64,
}

impl<T: Clone + Send + Sync + 'static> Drop for SettleGuard<T> {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        if !table.settle(&self.key, self.id) {
            return;
        }
        let grace = table.config.grace;
        let key = std::mem::take(&mut self.key);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&table);
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(table) = weak.upgrade() {
                        table.expire(&key, id);
                    }
                });
            }
            // Runtime shutting down: nobody can join anymore.
            Err(_) => table.expire(&key, id),
        }
    }
}

/// Drops the caller's subscription, including when the caller is cancelled.
struct Subscription<'a, T: Clone> {
    table: &'a TableInner<T>,
    key: &'a str,
    id: u64,
}

impl<T: Clone> Drop for Subscription<'_, T> {
    fn drop(&mut self) {
        self.table.detach(self.key, self.id);
    }
}

// ============================================================================
// TABLE
// ============================================================================

/// Deduplicates concurrent work per key.
pub struct CoalescingTable<T: Clone + Send + Sync + 'static> {
    inner: Arc<TableInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for CoalescingTable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> CoalescingTable<T> {
    pub fn new(config: CoalescingConfig) -> Self {
        Self {
            inner: Arc::new(TableInner {
                entries: Mutex::new(HashMap::new()),
                config,
                next_id: AtomicU64::new(1),
                started: AtomicU64::new(0),
                joined: AtomicU64::new(0),
                swept: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CoalescingConfig {
        &self.inner.config
    }

    /// Join the in-flight work for `key`, or start it with `start`.
    ///
    /// Returns the shared outcome and whether this caller joined existing
    /// work. `start` is only called when no entry exists. The work is
    /// spawned, so it completes even if every caller goes away.
    pub async fn join<F, Fut>(&self, key: &str, start: F) -> (Result<T, CoalesceError>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, shared, coalesced) = {
            let mut entries = self.inner.lock();
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.subscribers += 1;
                    (entry.id, entry.shared.clone(), true)
                }
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let shared = self.spawn(key, id, start());
                    entries.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            shared: shared.clone(),
                            started_at: Instant::now(),
                            subscribers: 1,
                            settled_at: None,
                        },
                    );
                    (id, shared, false)
                }
            }
        };

        if coalesced {
            self.inner.joined.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.started.fetch_add(1, Ordering::Relaxed);
        }
        (self.await_entry(key, id, shared).await, coalesced)
    }

    /// Join the in-flight work for `key` if there is any.
    pub async fn join_existing(&self, key: &str) -> Option<Result<T, CoalesceError>> {
        let (id, shared) = {
            let mut entries = self.inner.lock();
            let entry = entries.get_mut(key)?;
            entry.subscribers += 1;
            (entry.id, entry.shared.clone())
        };
        self.inner.joined.fetch_add(1, Ordering::Relaxed);
        Some(self.await_entry(key, id, shared).await)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Drop every entry older than the configured max age, regardless of
    /// subscribers. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let max_age = self.inner.config.max_age;
        let removed: Vec<String> = {
            let mut entries = self.inner.lock();
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.started_at.elapsed() > max_age)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &stale {
                entries.remove(key);
            }
            stale
        };

        if !removed.is_empty() {
            self.inner
                .swept
                .fetch_add(removed.len() as u64, Ordering::Relaxed);
            tracing::warn!(
                count = removed.len(),
                max_age_secs = max_age.as_secs(),
                "Swept in-flight resolutions past max age"
            );
        }
        removed.len()
    }

    pub fn stats(&self) -> CoalescingStats {
        let entries = self.inner.lock();
        CoalescingStats {
            in_flight: entries.len(),
            subscribers: entries.values().map(|e| e.subscribers).sum(),
            oldest_age: entries.values().map(|e| e.started_at.elapsed()).max(),
            started: self.inner.started.load(Ordering::Relaxed),
            joined: self.inner.joined.load(Ordering::Relaxed),
            swept: self.inner.swept.load(Ordering::Relaxed),
        }
    }

    fn spawn<Fut>(&self, key: &str, id: u64, work: Fut) -> SharedOutcome<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let guard = SettleGuard {
            table: Arc::downgrade(&self.inner),
            key: key.to_string(),
            id,
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        async move {
            handle.await.map_err(|e| {
                if e.is_panic() {
                    CoalesceError::Panicked
                } else {
                    CoalesceError::Cancelled
                }
            })
        }
        .boxed()
        .shared()
    }

    async fn await_entry(&self, key: &str, id: u64, shared: SharedOutcome<T>) -> Result<T, CoalesceError> {
        let _subscription = Subscription {
            table: &self.inner,
            key,
            id,
        };
        shared.await
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for CoalescingTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescingTable")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn table() -> CoalescingTable<u32> {
        CoalescingTable::new(
            CoalescingConfig::default()
                .with_grace(Duration::from_millis(50))
                .with_max_age(Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_config_validation() {
        assert!(CoalescingConfig::default().validate().is_ok());
        assert!(CoalescingConfig::default()
            .with_grace(Duration::from_secs(60))
            .validate()
            .is_err());
        assert!(CoalescingConfig::default()
            .with_sweep_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_execution() {
        let table = table();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let table = table.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                table
                    .join("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        7
                    })
                    .await
            }));
        }

        let mut coalesced = 0;
        for handle in handles {
            let (result, joined) = handle.await.unwrap();
            assert_eq!(result, Ok(7));
            if joined {
                coalesced += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalesced, 9);

        let stats = table.stats();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.joined, 9);
    }

    #[tokio::test]
    async fn test_entry_removed_after_grace() {
        let table = table();
        let (result, joined) = table.join("k", || async { 1 }).await;
        assert_eq!(result, Ok(1));
        assert!(!joined);

        // Still joinable inside the grace period.
        assert_eq!(table.join_existing("k").await, Some(Ok(1)));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!table.contains("k"));
        assert_eq!(table.stats().in_flight, 0);
        assert_eq!(table.join_existing("k").await, None);
    }

    #[tokio::test]
    async fn test_new_generation_after_removal() {
        let table = table();
        table.join("k", || async { 1 }).await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        let (result, joined) = table.join("k", || async { 2 }).await;
        assert_eq!(result, Ok(2));
        assert!(!joined);
    }

    #[tokio::test]
    async fn test_panicking_work_reports_panic_and_settles() {
        let table = table();
        let (result, _) = table
            .join("boom", || async {
                if true {
                    panic!("resolver exploded");
                }
                0
            })
            .await;
        assert_eq!(result, Err(CoalesceError::Panicked));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!table.contains("boom"));
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_leak_subscriber() {
        let table = table();
        let waiting = tokio::time::timeout(
            Duration::from_millis(20),
            table.join("slow", || async {
                tokio::time::sleep(Duration::from_millis(80)).await;
                3
            }),
        )
        .await;
        assert!(waiting.is_err());
        assert_eq!(table.stats().subscribers, 0);

        // The spawned work still finishes and the entry still goes away.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!table.contains("slow"));
    }

    #[tokio::test]
    async fn test_sweep_drops_old_entries() {
        let table: CoalescingTable<u32> = CoalescingTable::new(
            CoalescingConfig::default()
                .with_grace(Duration::from_millis(10))
                .with_max_age(Duration::from_millis(30)),
        );
        let stuck = table.clone();
        let waiter = tokio::spawn(async move {
            stuck
                .join("stuck", || async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    9
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        let stats = table.stats();
        assert_eq!(stats.in_flight, 1);
        assert!(stats.oldest_age.unwrap() >= Duration::from_millis(30));

        assert_eq!(table.sweep(), 1);
        assert!(!table.contains("stuck"));
        assert_eq!(table.stats().swept, 1);

        // The waiter still receives the value.
        let (result, _) = waiter.await.unwrap();
        assert_eq!(result, Ok(9));
    }
}
