//! Two-tier access cache with pluggable key-value stores.
//!
//! # Tiers
//!
//! - **Edge**: short TTL, jittered per write, mirrored in process memory.
//! - **Core**: longer TTL; entries in the final `swr_window` are served as
//!   degraded so the caller can refresh them in the background.
//!
//! The network tiers live in a [`KeyValueStore`]. [`InMemoryKvStore`] keeps
//! them in process; [`LmdbKvStore`] shares them between processes on a host.
//!
//! # Example
//!
//! ```ignore
//! let kv = Arc::new(InMemoryKvStore::new());
//! let cache = CacheStore::new(kv, CacheConfig::from_env())?;
//!
//! cache.set(&ctx, &manifest).await;
//! if let Some(entry) = cache.get(&ctx).await {
//!     // entry.state is READY or DEGRADED
//! }
//! ```

pub mod lmdb;
pub mod memory;
pub mod mirror;
pub mod store;
pub mod traits;
pub mod ttl;

pub use lmdb::{LmdbKvError, LmdbKvStore};
pub use memory::InMemoryKvStore;
pub use mirror::{EdgeMirror, MirrorHit};
pub use store::{CacheConfig, CacheStore};
pub use traits::{CacheStats, KeyValueStore};
pub use ttl::{CoreFreshness, TtlPolicy};
