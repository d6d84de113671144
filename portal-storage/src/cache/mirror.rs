//! In-process mirror of the edge tier.
//!
//! Capacity-bounded. When an insert finds live entries above the high
//! watermark, the entries closest to expiry are evicted first. Expired
//! entries are dropped when looked up and on every capacity check.

use portal_core::{CacheEntry, MIRROR_EVICTION_FRACTION, MIRROR_HIGH_WATERMARK};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct MirrorSlot {
    entry: CacheEntry,
    expires_at: Instant,
}

/// A mirrored edge entry with its remaining life.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorHit {
    pub entry: CacheEntry,
    pub remaining: Duration,
}

#[derive(Debug)]
pub struct EdgeMirror {
    capacity: usize,
    slots: Mutex<HashMap<String, MirrorSlot>>,
    evictions: AtomicU64,
}

impl EdgeMirror {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(HashMap::new()),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MirrorSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<MirrorHit> {
        let mut slots = self.lock();
        let now = Instant::now();
        let expires_at = slots.get(key)?.expires_at;
        if expires_at <= now {
            slots.remove(key);
            return None;
        }
        slots.get(key).map(|slot| MirrorHit {
            entry: slot.entry.clone(),
            remaining: expires_at - now,
        })
    }

    /// Insert or replace an entry that lives for `ttl`.
    pub fn insert(&self, key: &str, entry: CacheEntry, ttl: Duration) {
        let mut slots = self.lock();
        let now = Instant::now();

        if !slots.contains_key(key) {
            purge_locked(&mut slots, now);
            let threshold = self.capacity as f64 * MIRROR_HIGH_WATERMARK;
            if slots.len() as f64 > threshold {
                let evicted = evict_nearest_expiry(&mut slots);
                self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                tracing::debug!(evicted, capacity = self.capacity, "Edge mirror eviction");
            }
        }

        slots.insert(
            key.to_string(),
            MirrorSlot {
                entry,
                expires_at: now + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge_locked(&mut self.lock(), Instant::now())
    }

    /// Number of entries, expired ones not yet purged included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

fn purge_locked(slots: &mut HashMap<String, MirrorSlot>, now: Instant) -> usize {
    let before = slots.len();
    slots.retain(|_, slot| slot.expires_at > now);
    before - slots.len()
}

fn evict_nearest_expiry(slots: &mut HashMap<String, MirrorSlot>) -> usize {
    let count = ((slots.len() as f64 * MIRROR_EVICTION_FRACTION).ceil() as usize).max(1);
    let mut by_expiry: Vec<(Instant, String)> = slots
        .iter()
        .map(|(key, slot)| (slot.expires_at, key.clone()))
        .collect();
    by_expiry.sort_unstable_by_key(|(at, _)| *at);

    for (_, key) in by_expiry.into_iter().take(count) {
        slots.remove(&key);
    }
    count
}
