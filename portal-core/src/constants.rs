//! Constants for PORTAL
//!
//! Default values shared by the config structs of every crate in the
//! workspace. Centralizing them keeps the env readers and `Default` impls
//! in agreement.

// ============================================================================
// CACHE TIERS
// ============================================================================

/// Lower bound of the jittered edge TTL in seconds
pub const DEFAULT_EDGE_TTL_MIN_SECS: u64 = 60;

/// Upper bound (exclusive) of the jittered edge TTL in seconds
pub const DEFAULT_EDGE_TTL_MAX_SECS: u64 = 120;

/// Core tier TTL in seconds (10 minutes)
pub const DEFAULT_CORE_TTL_SECS: u64 = 600;

/// Stale-while-revalidate window at the tail of the core TTL
pub const DEFAULT_SWR_WINDOW_SECS: u64 = 30;

/// Default cache region used in key derivation
pub const DEFAULT_REGION: &str = "global";

// ============================================================================
// EDGE MIRROR
// ============================================================================

/// Maximum in-memory mirror entries
pub const DEFAULT_MIRROR_CAPACITY: usize = 10_000;

/// Live-entry ratio above which an insert triggers eviction
pub const MIRROR_HIGH_WATERMARK: f64 = 0.9;

/// Share of live entries evicted per eviction pass
pub const MIRROR_EVICTION_FRACTION: f64 = 0.2;

// ============================================================================
// CACHE KEYS
// ============================================================================

/// Maximum length of the normalized key body (digest excluded)
pub const DEFAULT_KEY_MAX_LEN: usize = 200;

/// Smallest key body length a config may ask for
pub const MIN_KEY_MAX_LEN: usize = 32;

/// Hex characters of the SHA-256 digest appended to every key
pub const KEY_DIGEST_HEX_LEN: usize = 16;

// ============================================================================
// COALESCING
// ============================================================================

/// Grace period before a settled in-flight entry is removed
pub const DEFAULT_COALESCE_GRACE_MS: u64 = 100;

/// Maximum age of an in-flight entry before the sweep drops it
pub const DEFAULT_COALESCE_MAX_AGE_SECS: u64 = 30;

/// How often the maintenance job sweeps the in-flight table
pub const DEFAULT_COALESCE_SWEEP_INTERVAL_SECS: u64 = 10;

// ============================================================================
// BUDGETS
// ============================================================================

/// Foreground resolution budget in milliseconds
pub const DEFAULT_BUDGET_MS: u64 = 200;

/// Budget for refreshes triggered by stale cache hits
pub const DEFAULT_BACKGROUND_BUDGET_MS: u64 = 5_000;

// ============================================================================
// BACKGROUND EXECUTOR
// ============================================================================

/// Maximum concurrently running background tasks
pub const DEFAULT_BACKGROUND_MAX_CONCURRENT: usize = 64;

/// Dead-letter ring capacity
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 256;

// ============================================================================
// MANIFESTS
// ============================================================================

/// Maximum length of a manifest format string
pub const MAX_FORMAT_LEN: usize = 64;

/// Format used by budget fallback manifests
pub const FALLBACK_FORMAT: &str = "html";
