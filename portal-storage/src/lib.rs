//! PORTAL Storage - Access Cache
//!
//! Two-tier (edge + core) cache for resolved access manifests, the
//! key-value store abstraction behind it, and the in-process edge mirror.

pub mod cache;

pub use cache::{
    CacheConfig, CacheStats, CacheStore, CoreFreshness, EdgeMirror, InMemoryKvStore,
    KeyValueStore, LmdbKvError, LmdbKvStore, MirrorHit, TtlPolicy,
};
