//! Bounded in-process cache tier
//!
//! Eviction drops the oldest-inserted key once capacity is reached; reads do
//! not refresh an entry's position. All mutations go through the write lock
//! so eviction never races an in-flight insert.

use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

use super::pattern::KeyPattern;
use super::{CacheEntry, CacheKey};

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
}

#[derive(Debug)]
pub struct MemoryTier {
    capacity: usize,
    inner: RwLock<MemoryInner>,
}

impl MemoryTier {
    /// `capacity` is clamped to at least one entry
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.read().await.entries.get(key).cloned()
    }

    /// Insert or replace an entry, returning the evicted key if any
    ///
    /// Replacing an existing key moves it to the back of the eviction order.
    pub async fn insert(&self, entry: CacheEntry) -> Option<CacheKey> {
        let key = entry.cache_key();
        let mut inner = self.inner.write().await;

        if inner.entries.insert(key.clone(), entry).is_some() {
            inner.order.retain(|k| k != &key);
            inner.order.push_back(key);
            return None;
        }
        inner.order.push_back(key);

        if inner.entries.len() <= self.capacity {
            return None;
        }
        let evicted = inner.order.pop_front()?;
        inner.entries.remove(&evicted);
        debug!(key = %evicted, "Memory tier evicted oldest entry");
        Some(evicted)
    }

    pub async fn remove(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.write().await;
        if inner.entries.remove(key).is_some() {
            inner.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Remove every entry whose part key matches `pattern`
    pub async fn remove_matching(&self, pattern: &KeyPattern) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|k, _| !pattern.matches(&k.key.to_string()));
        let MemoryInner { entries, order } = &mut *inner;
        order.retain(|k| entries.contains_key(k));
        before - entries.len()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
