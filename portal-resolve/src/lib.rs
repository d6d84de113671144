//! PORTAL Resolve - Access Resolution Engine
//!
//! Turns an [`AccessContext`](portal_core::AccessContext) into an access
//! manifest within a latency budget:
//!
//! - `registry`: item type to resolver mapping
//! - `coalescing`: at most one in-flight resolution per key
//! - `orchestrator`: cache lookup, coalescing and the budget race
//! - `background`: bounded executor for refreshes and detached races
//! - `telemetry`: events, listeners and Prometheus metrics
//! - `jobs`: periodic maintenance

pub mod background;
pub mod coalescing;
pub mod config;
pub mod fallback;
pub mod jobs;
pub mod orchestrator;
pub mod registry;
pub mod telemetry;

pub use background::{BackgroundConfig, BackgroundExecutor, BackgroundStats, DeadLetter};
pub use coalescing::{CoalesceError, CoalescingConfig, CoalescingStats, CoalescingTable};
pub use config::EngineConfig;
pub use fallback::budget_fallback;
pub use jobs::{maintenance_task, MaintenanceMetrics, MaintenanceSnapshot};
pub use orchestrator::{EngineStats, MaintenanceReport, OrchestratorBuilder, ResolutionOrchestrator};
pub use registry::{AccessResolver, FnResolver, ResolverRegistry};
pub use telemetry::{
    CacheHitEvent, CoalescedEvent, ListenerChain, ResolutionEvent, ResolutionMetrics,
    TelemetryListener, TracingListener,
};
