//! Resolver registry.
//!
//! Maps a normalized item type (`video`, `ebook`, `governance`...) to the
//! resolver that turns a context into a manifest. Resolvers carry no
//! timeout of their own; the orchestrator bounds them with its budget race.

use async_trait::async_trait;
use dashmap::DashMap;
use portal_core::{normalize_item_type, AccessContext, PortalResult, ResolveError, ResolverOutput};
use std::sync::Arc;

// ============================================================================
// RESOLVER TRAIT
// ============================================================================

/// Strategy producing a manifest for one item type.
///
/// Returning `Err` or panicking degrades the resolution; returning
/// `access = None` does too, with the output's `error` as the message.
#[async_trait]
pub trait AccessResolver: Send + Sync {
    async fn resolve(&self, ctx: &AccessContext) -> PortalResult<ResolverOutput>;
}

/// Adapts a synchronous function into an [`AccessResolver`].
///
/// The function runs on the blocking pool, so a slow or blocking resolver
/// never stalls the async workers and the budget race can still fire.
pub struct FnResolver<F> {
    f: Arc<F>,
}

impl<F> FnResolver<F>
where
    F: Fn(&AccessContext) -> PortalResult<ResolverOutput> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F> AccessResolver for FnResolver<F>
where
    F: Fn(&AccessContext) -> PortalResult<ResolverOutput> + Send + Sync + 'static,
{
    async fn resolve(&self, ctx: &AccessContext) -> PortalResult<ResolverOutput> {
        let f = Arc::clone(&self.f);
        let owned = ctx.clone();
        tokio::task::spawn_blocking(move || f(&owned))
            .await
            .map_err(|e| {
                let item_type = ctx.item_type.clone();
                if e.is_panic() {
                    ResolveError::ResolverPanicked { item_type }
                } else {
                    ResolveError::ResolverFailed {
                        item_type,
                        reason: "blocking resolver task cancelled".to_string(),
                    }
                }
            })?
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Concurrent item-type to resolver map.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: DashMap<String, Arc<dyn AccessResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver, replacing any previous one for the item type.
    pub fn register_resolver(
        &self,
        item_type: &str,
        resolver: Arc<dyn AccessResolver>,
    ) -> Option<Arc<dyn AccessResolver>> {
        let item_type = normalize_item_type(item_type);
        tracing::debug!(item_type = %item_type, "Registered access resolver");
        self.resolvers.insert(item_type, resolver)
    }

    /// Register a synchronous resolver function.
    pub fn register_fn<F>(&self, item_type: &str, f: F) -> Option<Arc<dyn AccessResolver>>
    where
        F: Fn(&AccessContext) -> PortalResult<ResolverOutput> + Send + Sync + 'static,
    {
        self.register_resolver(item_type, Arc::new(FnResolver::new(f)))
    }

    pub fn unregister(&self, item_type: &str) -> Option<Arc<dyn AccessResolver>> {
        self.resolvers
            .remove(&normalize_item_type(item_type))
            .map(|(_, resolver)| resolver)
    }

    pub fn get(&self, item_type: &str) -> Option<Arc<dyn AccessResolver>> {
        self.resolvers
            .get(&normalize_item_type(item_type))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, item_type: &str) -> bool {
        self.resolvers.contains_key(&normalize_item_type(item_type))
    }

    /// Registered item types, sorted.
    pub fn item_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.resolvers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("item_types", &self.item_types())
            .finish()
    }
}
