//! Telemetry events and listener dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_core::{
    AccessContext, CacheStatus, CacheTier, EnhancedAccessResult, PortalResult, ReadinessState,
    ResolutionOutcome,
};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// EVENTS
// ============================================================================

/// Emitted once for every call to the orchestrator, whatever the path.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionEvent {
    pub resolution_id: Uuid,
    pub item_type: String,
    pub source: String,
    pub cache_status: CacheStatus,
    pub readiness: ReadinessState,
    pub outcome: ResolutionOutcome,
    pub latency_ms: u64,
    pub coalesced: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ResolutionEvent {
    pub fn new(resolution_id: Uuid, ctx: &AccessContext, result: &EnhancedAccessResult) -> Self {
        Self {
            resolution_id,
            item_type: ctx.normalized_item_type(),
            source: ctx.source.clone(),
            cache_status: result.cache_status,
            readiness: result.readiness,
            outcome: result.outcome(),
            latency_ms: result.latency_ms,
            coalesced: result.coalesced,
            error: result.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Emitted when a lookup is answered by a cache tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHitEvent {
    pub resolution_id: Uuid,
    pub item_type: String,
    pub source: String,
    pub tier: CacheTier,
    pub state: ReadinessState,
    pub ttl_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Emitted when a caller joins a resolution already in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct CoalescedEvent {
    pub resolution_id: Uuid,
    pub item_type: String,
    pub source: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// LISTENERS
// ============================================================================

/// Sink for resolution telemetry. Every method defaults to a no-op.
#[async_trait]
pub trait TelemetryListener: Send + Sync {
    async fn on_resolution(&self, _event: ResolutionEvent) -> PortalResult<()> {
        Ok(())
    }

    async fn on_cache_hit(&self, _event: CacheHitEvent) -> PortalResult<()> {
        Ok(())
    }

    async fn on_coalesced(&self, _event: CoalescedEvent) -> PortalResult<()> {
        Ok(())
    }
}

/// Chain of telemetry listeners.
///
/// A failing listener is logged and skipped; it never affects the
/// resolution or the listeners after it.
pub struct ListenerChain {
    listeners: Vec<Arc<dyn TelemetryListener>>,
}

impl ListenerChain {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add(&mut self, listener: Arc<dyn TelemetryListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub async fn emit_resolution(&self, event: ResolutionEvent) {
        for (idx, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.on_resolution(event.clone()).await {
                tracing::warn!(
                    listener_index = idx,
                    error = %e,
                    "Resolution listener failed"
                );
            }
        }
    }

    pub async fn emit_cache_hit(&self, event: CacheHitEvent) {
        for (idx, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.on_cache_hit(event.clone()).await {
                tracing::warn!(
                    listener_index = idx,
                    error = %e,
                    "Cache hit listener failed"
                );
            }
        }
    }

    pub async fn emit_coalesced(&self, event: CoalescedEvent) {
        for (idx, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.on_coalesced(event.clone()).await {
                tracing::warn!(
                    listener_index = idx,
                    error = %e,
                    "Coalesced listener failed"
                );
            }
        }
    }
}

impl Default for ListenerChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

#[async_trait]
impl TelemetryListener for TracingListener {
    async fn on_resolution(&self, event: ResolutionEvent) -> PortalResult<()> {
        tracing::debug!(
            resolution_id = %event.resolution_id,
            item_type = %event.item_type,
            source = %event.source,
            cache_status = event.cache_status.as_str(),
            readiness = event.readiness.as_str(),
            outcome = event.outcome.as_str(),
            latency_ms = event.latency_ms,
            coalesced = event.coalesced,
            error = event.error.as_deref().unwrap_or(""),
            "Access resolved"
        );
        Ok(())
    }

    async fn on_cache_hit(&self, event: CacheHitEvent) -> PortalResult<()> {
        tracing::trace!(
            resolution_id = %event.resolution_id,
            item_type = %event.item_type,
            tier = event.tier.as_str(),
            state = event.state.as_str(),
            ttl_ms = event.ttl_ms,
            "Cache hit"
        );
        Ok(())
    }

    async fn on_coalesced(&self, event: CoalescedEvent) -> PortalResult<()> {
        tracing::trace!(
            resolution_id = %event.resolution_id,
            item_type = %event.item_type,
            key = %event.key,
            "Joined in-flight resolution"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::{AccessManifest, ResolveError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl TelemetryListener for Counting {
        async fn on_resolution(&self, _event: ResolutionEvent) -> PortalResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl TelemetryListener for Broken {
        async fn on_resolution(&self, _event: ResolutionEvent) -> PortalResult<()> {
            Err(ResolveError::NoResolver {
                item_type: "sink".to_string(),
            }
            .into())
        }
    }

    fn event() -> ResolutionEvent {
        let ctx = AccessContext::new("Video", "youtube");
        let result = EnhancedAccessResult::ready(
            AccessManifest::open_web("https://youtube.com/watch?v=abc"),
            Duration::from_secs(60),
        );
        ResolutionEvent::new(Uuid::now_v7(), &ctx, &result)
    }

    #[test]
    fn test_event_copies_result_labels() {
        let event = event();
        assert_eq!(event.item_type, "video");
        assert_eq!(event.source, "youtube");
        assert_eq!(event.outcome, ResolutionOutcome::Resolved);
        assert_eq!(event.cache_status, CacheStatus::Miss);
        assert!(event.error.is_none());
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_chain() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let mut chain = ListenerChain::new();
        chain.add(Arc::new(Broken));
        chain.add(counting.clone());
        chain.add(Arc::new(TracingListener));

        chain.emit_resolution(event()).await;
        chain.emit_resolution(event()).await;
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
        assert_eq!(chain.len(), 3);
    }
}
