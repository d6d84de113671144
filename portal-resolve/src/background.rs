//! Bounded background execution.
//!
//! Stale-hit refreshes and the detached losers of budget races run here
//! instead of as bare spawned tasks. Concurrency is capped by a semaphore;
//! work submitted past the cap is rejected rather than queued. Every
//! failure, panic and rejection lands in a bounded dead-letter ring so it
//! stays observable.

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use portal_core::{ConfigError, DEFAULT_BACKGROUND_MAX_CONCURRENT, DEFAULT_DEAD_LETTER_CAPACITY};
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the background executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundConfig {
    /// Maximum concurrently running submitted tasks (default: 64)
    pub max_concurrent: usize,
    /// Dead letters kept before the oldest is dropped (default: 256)
    pub dead_letter_capacity: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_BACKGROUND_MAX_CONCURRENT,
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }
}

impl BackgroundConfig {
    /// Create BackgroundConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `PORTAL_BACKGROUND_MAX_CONCURRENT`: Concurrency cap (default: 64)
    /// - `PORTAL_DEAD_LETTER_CAPACITY`: Dead-letter ring size (default: 256)
    pub fn from_env() -> Self {
        let max_concurrent = std::env::var("PORTAL_BACKGROUND_MAX_CONCURRENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BACKGROUND_MAX_CONCURRENT);

        let dead_letter_capacity = std::env::var("PORTAL_DEAD_LETTER_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_DEAD_LETTER_CAPACITY);

        Self {
            max_concurrent,
            dead_letter_capacity,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                field: "background_max_concurrent".to_string(),
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

/// A background task that did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub task: String,
    pub key: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time executor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackgroundStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub panicked: u64,
    /// Detached join handles handed over with [`BackgroundExecutor::track`].
    pub tracked: u64,
    /// Submitted or tracked work not yet finished.
    pub running: usize,
    pub dead_letters: usize,
}

enum Finish {
    Completed,
    Failed(String),
    Panicked(String),
}

struct ExecutorInner {
    config: BackgroundConfig,
    permits: Arc<Semaphore>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,
    tracked: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
}

impl ExecutorInner {
    fn dead_letter(&self, task: &str, key: &str, error: String) {
        let capacity = self.config.dead_letter_capacity;
        if capacity == 0 {
            return;
        }
        let mut letters = self
            .dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while letters.len() >= capacity {
            letters.pop_front();
        }
        letters.push_back(DeadLetter {
            task: task.to_string(),
            key: key.to_string(),
            error,
            at: Utc::now(),
        });
    }

    fn finish(&self, task: &'static str, key: &str, finish: Finish) {
        match finish {
            Finish::Completed => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(task, key, "Background task completed");
            }
            Finish::Failed(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task, key, error = %error, "Background task failed");
                self.dead_letter(task, key, error);
            }
            Finish::Panicked(message) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::error!(task, key, panic = %message, "Background task panicked");
                self.dead_letter(task, key, format!("panicked: {}", message));
            }
        }

        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Semaphore-bounded executor with a dead-letter sink.
#[derive(Clone)]
pub struct BackgroundExecutor {
    inner: Arc<ExecutorInner>,
}

impl BackgroundExecutor {
    pub fn new(config: BackgroundConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner: Arc::new(ExecutorInner {
                config,
                permits,
                dead_letters: Mutex::new(VecDeque::new()),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
                tracked: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.inner.config
    }

    /// Run `work` in the background if a slot is free.
    ///
    /// Returns false when the executor is saturated; the rejection is
    /// dead-lettered and `work` is dropped without running.
    pub fn submit<F>(&self, task: &'static str, key: impl Into<String>, work: F) -> bool
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        let key = key.into();
        let permit = match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    task,
                    key = %key,
                    max_concurrent = self.inner.config.max_concurrent,
                    "Background executor saturated, task rejected"
                );
                self.inner.dead_letter(
                    task,
                    &key,
                    format!(
                        "rejected: {} background tasks already running",
                        self.inner.config.max_concurrent
                    ),
                );
                return false;
            }
        };

        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.fetch_add(1, Ordering::AcqRel);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(work).catch_unwind().await;
            drop(permit);
            let finish = match outcome {
                Ok(Ok(())) => Finish::Completed,
                Ok(Err(error)) => Finish::Failed(error),
                Err(payload) => Finish::Panicked(panic_message(payload.as_ref())),
            };
            inner.finish(task, &key, finish);
        });
        true
    }

    /// Watch an already spawned task and record how it ends.
    ///
    /// Tracked tasks do not take a concurrency slot; they were started by
    /// the caller and cannot be refused.
    pub fn track<T, C>(&self, task: &'static str, key: impl Into<String>, handle: JoinHandle<T>, classify: C)
    where
        T: Send + 'static,
        C: FnOnce(T) -> Result<(), String> + Send + 'static,
    {
        let key = key.into();
        self.inner.tracked.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.fetch_add(1, Ordering::AcqRel);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let finish = match handle.await {
                Ok(value) => match classify(value) {
                    Ok(()) => Finish::Completed,
                    Err(error) => Finish::Failed(error),
                },
                Err(e) if e.is_panic() => Finish::Panicked(panic_message(e.into_panic().as_ref())),
                Err(_) => Finish::Failed("cancelled".to_string()),
            };
            inner.finish(task, &key, finish);
        });
    }

    /// Wait until no submitted or tracked work is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Dead letters, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner
            .dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Remove and return all dead letters.
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter> {
        self.inner
            .dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn stats(&self) -> BackgroundStats {
        BackgroundStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
            tracked: self.inner.tracked.load(Ordering::Relaxed),
            running: self.inner.pending.load(Ordering::Acquire),
            dead_letters: self
                .inner
                .dead_letters
                .lock()
                .map(|letters| letters.len())
                .unwrap_or(0),
        }
    }
}

impl Default for BackgroundExecutor {
    fn default() -> Self {
        Self::new(BackgroundConfig::default())
    }
}

impl std::fmt::Debug for BackgroundExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundExecutor")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_successful_task_completes() {
        let executor = BackgroundExecutor::default();
        assert!(executor.submit("refresh", "k", async { Ok(()) }));
        executor.wait_idle().await;

        let stats = executor.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 0);
        assert!(executor.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_dead_lettered() {
        let executor = BackgroundExecutor::default();
        executor.submit("refresh", "video:abc", async { Err("upstream 503".to_string()) });
        executor.wait_idle().await;

        let letters = executor.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].task, "refresh");
        assert_eq!(letters[0].key, "video:abc");
        assert_eq!(letters[0].error, "upstream 503");
        assert_eq!(executor.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_dead_lettered() {
        let executor = BackgroundExecutor::default();
        executor.submit("refresh", "k", async {
            if true {
                panic!("resolver blew up");
            }
            Ok(())
        });
        executor.wait_idle().await;

        let stats = executor.stats();
        assert_eq!(stats.panicked, 1);
        assert!(executor.dead_letters()[0].error.contains("resolver blew up"));
    }

    #[tokio::test]
    async fn test_saturated_executor_rejects() {
        let executor = BackgroundExecutor::new(BackgroundConfig::default().with_max_concurrent(1));
        let (tx, rx) = oneshot::channel::<()>();

        assert!(executor.submit("refresh", "a", async move {
            let _ = rx.await;
            Ok(())
        }));
        assert!(!executor.submit("refresh", "b", async { Ok(()) }));

        let stats = executor.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.dead_letters, 1);
        assert!(executor.dead_letters()[0].error.starts_with("rejected"));

        tx.send(()).unwrap();
        executor.wait_idle().await;
        // The slot is free again.
        assert!(executor.submit("refresh", "c", async { Ok(()) }));
        executor.wait_idle().await;
        assert_eq!(executor.stats().completed, 2);
    }

    #[tokio::test]
    async fn test_dead_letter_ring_is_bounded() {
        let executor = BackgroundExecutor::new(BackgroundConfig::default().with_dead_letter_capacity(3));
        for i in 0..5 {
            executor.submit("refresh", format!("k{}", i), async move { Err(format!("e{}", i)) });
        }
        executor.wait_idle().await;

        let letters = executor.dead_letters();
        assert_eq!(letters.len(), 3);
        assert_eq!(executor.drain_dead_letters().len(), 3);
        assert!(executor.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_track_classifies_join_handle() {
        let executor = BackgroundExecutor::default();
        let ok = tokio::spawn(async { 1u32 });
        let bad = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            2u32
        });

        executor.track("race", "a", ok, |_| Ok(()));
        executor.track("race", "b", bad, |v| Err(format!("value {}", v)));
        executor.wait_idle().await;

        let stats = executor.stats();
        assert_eq!(stats.tracked, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(executor.dead_letters()[0].error, "value 2");
    }

    #[test]
    fn test_config_validation() {
        assert!(BackgroundConfig::default().validate().is_ok());
        assert!(BackgroundConfig::default().with_max_concurrent(0).validate().is_err());
    }
}
