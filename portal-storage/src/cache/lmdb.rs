//! LMDB-backed key-value store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to share cache tiers between
//! processes on one host. LMDB has no native expiry, so each value carries
//! its deadline:
//!
//! ```text
//! [expires_at_millis: 8 bytes LE][value bytes]
//! ```
//!
//! Expired values are invisible to `get` and reclaimed by
//! [`LmdbKvStore::purge_expired`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use portal_core::{BackendError, PortalError, PortalResult};

use super::traits::KeyValueStore;

const HEADER_LEN: usize = 8;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbKvError {
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Corrupt value for key {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbKvError> for PortalError {
    fn from(e: LmdbKvError) -> Self {
        PortalError::Backend(BackendError::Unavailable {
            backend: "lmdb".to_string(),
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbKvError {
    LmdbKvError::Transaction(e.to_string())
}

/// [`KeyValueStore`] on a memory-mapped LMDB environment.
pub struct LmdbKvStore {
    env: Env,
    db: Database<Str, Bytes>,
}

impl LmdbKvStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbKvError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process;
        // the files are not truncated or modified outside LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbKvError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbKvError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self { env, db })
    }

    /// Remove every expired value. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbKvError> {
        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let iter = self.db.iter(&rtxn).map_err(txn_err)?;
            iter.filter_map(Result::ok)
                .filter(|(_, bytes)| decode_deadline(bytes).map_or(true, |at| at <= now))
                .map(|(key, _)| key.to_string())
                .collect()
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        if deleted > 0 {
            tracing::debug!(deleted, "Purged expired LMDB cache values");
        }
        Ok(deleted)
    }

    /// Number of stored values, expired ones included.
    pub fn len(&self) -> Result<u64, LmdbKvError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.db.len(&rtxn).map_err(txn_err)
    }

    pub fn is_empty(&self) -> Result<bool, LmdbKvError> {
        Ok(self.len()? == 0)
    }
}

fn decode_deadline(bytes: &[u8]) -> Option<i64> {
    let header: [u8; HEADER_LEN] = bytes.get(0..HEADER_LEN)?.try_into().ok()?;
    Some(i64::from_le_bytes(header))
}

#[async_trait]
impl KeyValueStore for LmdbKvStore {
    async fn get(&self, key: &str) -> PortalResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let Some(bytes) = self.db.get(&rtxn, key).map_err(txn_err)? else {
            return Ok(None);
        };

        let deadline = decode_deadline(bytes).ok_or_else(|| LmdbKvError::Corrupt(key.to_string()))?;
        if deadline <= Utc::now().timestamp_millis() {
            return Ok(None);
        }
        Ok(Some(bytes[HEADER_LEN..].to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> PortalResult<()> {
        let deadline = Utc::now().timestamp_millis() + ttl.as_millis() as i64;

        let mut full_bytes = Vec::with_capacity(HEADER_LEN + value.len());
        full_bytes.extend_from_slice(&deadline.to_le_bytes());
        full_bytes.extend_from_slice(&value);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key, &full_bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> PortalResult<u64> {
        let now = Utc::now().timestamp_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in keys {
            let live = self
                .db
                .get(&wtxn, key)
                .map_err(txn_err)?
                .and_then(decode_deadline)
                .is_some_and(|at| at > now);
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? && live {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    fn name(&self) -> &'static str {
        "lmdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbKvStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbKvStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("access:global:video:k:edge", b"{}".to_vec(), Duration::from_secs(60))
            .await
            .expect("set should succeed");

        let value = store
            .get("access:global:video:k:edge")
            .await
            .expect("get should succeed");
        assert_eq!(value, Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.get("missing").await.expect("get should succeed").is_none());
    }

    #[tokio::test]
    async fn test_expiry_and_purge() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("gone", b"x".to_vec(), Duration::from_millis(5))
            .await
            .expect("set should succeed");
        store
            .set("kept", b"y".to_vec(), Duration::from_secs(60))
            .await
            .expect("set should succeed");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(store.get("gone").await.expect("get should succeed").is_none());
        assert_eq!(store.len().expect("len should succeed"), 2);
        assert_eq!(store.purge_expired().expect("purge should succeed"), 1);
        assert_eq!(store.len().expect("len should succeed"), 1);
    }

    #[tokio::test]
    async fn test_del_counts_live_keys() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("a", b"1".to_vec(), Duration::from_secs(60))
            .await
            .expect("set should succeed");
        store
            .set("b", b"2".to_vec(), Duration::from_secs(60))
            .await
            .expect("set should succeed");

        let deleted = store
            .del(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .expect("del should succeed");
        assert_eq!(deleted, 2);
        assert!(store.is_empty().expect("is_empty should succeed"));
    }
}
