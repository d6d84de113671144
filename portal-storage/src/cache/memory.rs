//! Process-local key-value store.
//!
//! Stands in for the shared network store in tests and single-instance
//! deployments. Expiry is enforced on read; [`InMemoryKvStore::purge_expired`]
//! reclaims memory.

use async_trait::async_trait;
use portal_core::{BackendError, PortalResult};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::traits::KeyValueStore;

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// In-memory [`KeyValueStore`] with native TTL expiry.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    values: RwLock<HashMap<String, StoredValue>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values, expired ones included.
    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired value. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.values.write() {
            Ok(mut values) => {
                let before = values.len();
                values.retain(|_, v| v.expires_at > now);
                before - values.len()
            }
            Err(_) => 0,
        }
    }
}

fn poisoned() -> BackendError {
    BackendError::LockPoisoned {
        resource: "in-memory kv store".to_string(),
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> PortalResult<Option<Vec<u8>>> {
        let values = self.values.read().map_err(|_| poisoned())?;
        Ok(values
            .get(key)
            .filter(|v| v.expires_at > Instant::now())
            .map(|v| v.bytes.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> PortalResult<()> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        values.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> PortalResult<u64> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        let now = Instant::now();
        let mut deleted = 0;
        for key in keys {
            if let Some(v) = values.remove(key) {
                if v.expires_at > now {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = InMemoryKvStore::new();
        store
            .set("a", b"one".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));

        let deleted = store
            .del(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_values_are_invisible() {
        let store = InMemoryKvStore::new();
        store
            .set("short", b"x".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_resets_ttl() {
        let store = InMemoryKvStore::new();
        store
            .set("k", b"old".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        store
            .set("k", b"new".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(b"new".to_vec()));
    }
}
