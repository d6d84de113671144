//! Prometheus Metrics Definitions
//!
//! Resolution counters and latency histogram, registered on a registry
//! owned by the engine so several engines can live in one process.

use async_trait::async_trait;
use portal_core::{ConfigError, PortalResult};
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

use super::events::{CacheHitEvent, CoalescedEvent, ResolutionEvent, TelemetryListener};

/// Resolution latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Container for all resolution metrics.
#[derive(Clone)]
pub struct ResolutionMetrics {
    registry: Registry,

    /// Resolution counter - labels: item_type, source, cache_status, readiness, outcome
    pub resolutions_total: CounterVec,

    /// Cache hit counter - labels: tier
    pub cache_hits_total: CounterVec,

    /// Coalesced join counter - labels: item_type
    pub coalesced_total: CounterVec,

    /// Resolution latency histogram - labels: item_type
    pub resolution_latency_seconds: HistogramVec,
}

fn register_failed(name: &str, e: prometheus::Error) -> ConfigError {
    ConfigError::InvalidValue {
        field: "metrics".to_string(),
        value: name.to_string(),
        reason: format!("Failed to register metric: {}", e),
    }
}

impl ResolutionMetrics {
    /// Create all metrics and register them on a fresh registry.
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_registry(Registry::new())
    }

    /// Create all metrics and register them on `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self, ConfigError> {
        let resolutions_total = CounterVec::new(
            Opts::new("portal_resolutions_total", "Total number of access resolutions"),
            &["item_type", "source", "cache_status", "readiness", "outcome"],
        )
        .map_err(|e| register_failed("portal_resolutions_total", e))?;

        let cache_hits_total = CounterVec::new(
            Opts::new("portal_cache_hits_total", "Total number of cache hits per tier"),
            &["tier"],
        )
        .map_err(|e| register_failed("portal_cache_hits_total", e))?;

        let coalesced_total = CounterVec::new(
            Opts::new(
                "portal_coalesced_total",
                "Total number of callers that joined an in-flight resolution",
            ),
            &["item_type"],
        )
        .map_err(|e| register_failed("portal_coalesced_total", e))?;

        let resolution_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "portal_resolution_latency_seconds",
                "Access resolution latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["item_type"],
        )
        .map_err(|e| register_failed("portal_resolution_latency_seconds", e))?;

        registry
            .register(Box::new(resolutions_total.clone()))
            .map_err(|e| register_failed("portal_resolutions_total", e))?;
        registry
            .register(Box::new(cache_hits_total.clone()))
            .map_err(|e| register_failed("portal_cache_hits_total", e))?;
        registry
            .register(Box::new(coalesced_total.clone()))
            .map_err(|e| register_failed("portal_coalesced_total", e))?;
        registry
            .register(Box::new(resolution_latency_seconds.clone()))
            .map_err(|e| register_failed("portal_resolution_latency_seconds", e))?;

        Ok(Self {
            registry,
            resolutions_total,
            cache_hits_total,
            coalesced_total,
            resolution_latency_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_resolution(&self, event: &ResolutionEvent) {
        self.resolutions_total
            .with_label_values(&[
                event.item_type.as_str(),
                event.source.as_str(),
                event.cache_status.as_str(),
                event.readiness.as_str(),
                event.outcome.as_str(),
            ])
            .inc();
        self.resolution_latency_seconds
            .with_label_values(&[event.item_type.as_str()])
            .observe(event.latency_ms as f64 / 1000.0);
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl std::fmt::Debug for ResolutionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionMetrics").finish_non_exhaustive()
    }
}

#[async_trait]
impl TelemetryListener for ResolutionMetrics {
    async fn on_resolution(&self, event: ResolutionEvent) -> PortalResult<()> {
        self.record_resolution(&event);
        Ok(())
    }

    async fn on_cache_hit(&self, event: CacheHitEvent) -> PortalResult<()> {
        self.cache_hits_total
            .with_label_values(&[event.tier.as_str()])
            .inc();
        Ok(())
    }

    async fn on_coalesced(&self, event: CoalescedEvent) -> PortalResult<()> {
        self.coalesced_total
            .with_label_values(&[event.item_type.as_str()])
            .inc();
        Ok(())
    }
}
