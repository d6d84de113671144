//! Enum types shared across the engine.

use serde::{Deserialize, Serialize};

/// How usable a returned manifest is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadinessState {
    /// Budget exceeded; a fallback is in use while the real resolution runs on.
    Pending,
    /// Fresh value.
    Ready,
    /// Stale-but-usable value, or a resolution error.
    Degraded,
}

impl ReadinessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Degraded => "DEGRADED",
        }
    }
}

/// Cache tier an entry was written to or read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Short-lived, TTL-jittered tier mirrored in process memory.
    Edge,
    /// Longer-lived tier with a stale-while-revalidate window.
    Core,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Edge => "edge",
            Self::Core => "core",
        }
    }
}

/// Where a result came from, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    EdgeHit,
    CoreHit,
    Miss,
    /// Joined a resolution another caller had already started.
    Coalesced,
    /// Cache read skipped via `skip_cache` or `force_refresh`.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EdgeHit => "edge_hit",
            Self::CoreHit => "core_hit",
            Self::Miss => "miss",
            Self::Coalesced => "coalesced",
            Self::Bypass => "bypass",
        }
    }

    /// Status reported for a hit on the given tier.
    pub fn hit(tier: CacheTier) -> Self {
        match tier {
            CacheTier::Edge => Self::EdgeHit,
            CacheTier::Core => Self::CoreHit,
        }
    }
}

/// Outcome label attached to resolution telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// A validated manifest was produced or served fresh.
    Resolved,
    /// A stale cached manifest was served.
    Stale,
    /// The budget fired and a fallback was returned.
    Fallback,
    /// No usable manifest.
    Failed,
}

impl ResolutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Stale => "stale",
            Self::Fallback => "fallback",
            Self::Failed => "failed",
        }
    }
}
