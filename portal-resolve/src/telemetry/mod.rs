//! Resolution telemetry.
//!
//! - `events`: event types, the `TelemetryListener` trait and `ListenerChain`
//! - `metrics`: Prometheus counters and latency histogram

pub mod events;
pub mod metrics;

pub use events::{
    CacheHitEvent, CoalescedEvent, ListenerChain, ResolutionEvent, TelemetryListener,
    TracingListener,
};
pub use metrics::{ResolutionMetrics, LATENCY_BUCKETS};
