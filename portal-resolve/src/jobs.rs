//! Maintenance Background Task
//!
//! Periodically bounds the engine's in-process state:
//!
//! - in-flight resolutions older than the coalescing max age are swept, so a
//!   stuck upstream call cannot pin its key forever
//! - expired edge-mirror entries are purged between capacity checks
//!
//! # Example
//!
//! ```ignore
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let interval = orchestrator.config().coalescing.sweep_interval;
//! let handle = tokio::spawn(maintenance_task(orchestrator.clone(), interval, shutdown_rx));
//!
//! // Later, trigger shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::orchestrator::ResolutionOrchestrator;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for maintenance activity.
#[derive(Debug, Default)]
pub struct MaintenanceMetrics {
    /// Maintenance passes completed
    pub cycles: AtomicU64,

    /// In-flight entries swept for exceeding the max age
    pub swept: AtomicU64,

    /// Expired mirror entries purged
    pub purged: AtomicU64,
}

impl MaintenanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of maintenance metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSnapshot {
    pub cycles: u64,
    pub swept: u64,
    pub purged: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run maintenance passes every `every` until `shutdown_rx` turns true.
///
/// Returns the metrics collected during the task's lifetime.
pub async fn maintenance_task(
    orchestrator: ResolutionOrchestrator,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<MaintenanceMetrics> {
    let metrics = Arc::new(MaintenanceMetrics::new());

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_ms = every.as_millis() as u64,
        max_in_flight_age_secs = orchestrator.config().coalescing.max_age.as_secs(),
        "Maintenance task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Maintenance task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                run_cycle(&orchestrator, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        swept = snapshot.swept,
        purged = snapshot.purged,
        "Maintenance task completed"
    );

    metrics
}

fn run_cycle(orchestrator: &ResolutionOrchestrator, metrics: &MaintenanceMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    let report = orchestrator.run_maintenance();
    metrics.swept.fetch_add(report.swept as u64, Ordering::Relaxed);
    metrics.purged.fetch_add(report.purged as u64, Ordering::Relaxed);

    if report.swept > 0 || report.purged > 0 {
        tracing::debug!(
            swept = report.swept,
            purged = report.purged,
            "Maintenance cycle completed"
        );
    } else {
        tracing::trace!("Maintenance cycle completed with nothing to clean");
    }
}
