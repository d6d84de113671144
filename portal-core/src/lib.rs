//! PORTAL Core - Access Resolution Types
//!
//! Data model shared by every PORTAL crate: contexts, manifests, cache
//! entries, the error taxonomy, cache-key derivation, manifest validation
//! and the external-URL policy. No I/O and no async here.

pub mod constants;
pub mod context;
pub mod entry;
pub mod enums;
pub mod error;
pub mod key;
pub mod manifest;
pub mod policy;
pub mod validation;

pub use constants::*;
pub use context::{normalize_item_type, AccessContext, ContextMetadata};
pub use entry::{CacheEntry, EnhancedAccessResult, ResolveOptions, ResolverOutput};
pub use enums::{CacheStatus, CacheTier, ReadinessState, ResolutionOutcome};
pub use error::{
    BackendError, ConfigError, PolicyError, PortalError, PortalResult, ResolveError,
    ValidationError,
};
pub use key::AccessKey;
pub use manifest::{AccessManifest, AccessMode};
pub use policy::{PolicyConfig, UrlPolicy};
pub use validation::{ManifestValidator, SchemaValidator};
