//! In-memory idempotency store and vector cache.
//!
//! A `tokio::sync::RwLock` guarding a `HashMap`, with lazy expiry on access.
//! Adds bounded capacity with LRU-by-`expires_at` eviction and hit/miss/
//! eviction stats counters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheError, CacheStats, IdempotencyStore, StepKey, VectorCache, VectorCacheEntry};
use crate::message::Message;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.expires_at < Instant::now()
    }
}

/// Bounded, TTL-expiring in-memory [`IdempotencyStore`].
///
/// Caps growth at `max_entries`; beyond that the entry with the earliest `expires_at`
/// (i.e. the one due to expire soonest) is evicted to make room, which is a
/// fair approximation of true LRU without tracking access order.
pub struct InMemoryIdempotencyStore {
    data: RwLock<HashMap<StepKey, Entry<Message>>>,
    stats: RwLock<CacheStats>,
    max_entries: usize,
}

impl InMemoryIdempotencyStore {
    pub fn new(max_entries: usize) -> Self {
        InMemoryIdempotencyStore {
            data: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            max_entries,
        }
    }

    async fn evict_if_over_capacity(&self, data: &mut HashMap<StepKey, Entry<Message>>) {
        if self.max_entries == 0 || data.len() < self.max_entries {
            return;
        }
        if let Some(victim) = data
            .iter()
            .min_by_key(|(_, e)| e.expires_at)
            .map(|(k, _)| k.clone())
        {
            data.remove(&victim);
            self.stats.write().await.evictions += 1;
        }
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &StepKey) -> Option<Message> {
        let hit = {
            let data = self.data.read().await;
            data.get(key).filter(|e| !e.is_expired()).map(|e| e.value.clone())
        };
        let mut stats = self.stats.write().await;
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    async fn save(&self, key: StepKey, msg: Message, ttl: Duration) -> Result<(), CacheError> {
        let mut data = self.data.write().await;
        self.evict_if_over_capacity(&mut data).await;
        data.insert(
            key,
            Entry {
                value: msg,
                expires_at: Instant::now() + ttl,
            },
        );
        self.stats.write().await.entries = data.len() as u64;
        Ok(())
    }

    async fn delete(&self, key: &StepKey) -> Result<(), CacheError> {
        let mut data = self.data.write().await;
        data.remove(key);
        self.stats.write().await.entries = data.len() as u64;
        Ok(())
    }

    async fn exists(&self, key: &StepKey) -> bool {
        let data = self.data.read().await;
        data.get(key).is_some_and(|e| !e.is_expired())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.data.write().await.clear();
        self.stats.write().await.entries = 0;
        Ok(())
    }

    async fn get_stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}

/// In-memory [`VectorCache`]. Non-authoritative per §4.10: callers are
/// expected to swallow its errors.
pub struct InMemoryVectorCache {
    data: RwLock<HashMap<String, Entry<VectorCacheEntry>>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryVectorCache {
    pub fn new() -> Self {
        InMemoryVectorCache {
            data: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }
}

impl Default for InMemoryVectorCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorCache for InMemoryVectorCache {
    async fn put(&self, entry: VectorCacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let mut data = self.data.write().await;
        data.insert(
            entry.key.clone(),
            Entry {
                value: entry,
                expires_at: Instant::now() + ttl,
            },
        );
        self.stats.write().await.entries = data.len() as u64;
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<VectorCacheEntry> {
        let hit = {
            let data = self.data.read().await;
            data.get(key).filter(|e| !e.is_expired()).map(|e| e.value.clone())
        };
        let mut stats = self.stats.write().await;
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.data.write().await.clear();
        self.stats.write().await.entries = 0;
        Ok(())
    }

    async fn get_stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn msg() -> Message {
        Message::new("hi", "user")
    }

    #[tokio::test]
    async fn save_then_get_hits() {
        let store = InMemoryIdempotencyStore::default();
        let key = ("node-a".to_string(), "sig-1".to_string());
        store.save(key.clone(), msg(), Duration::from_secs(60)).await.unwrap();
        assert!(store.get(&key).await.is_some());
        let stats = store.get_stats().await;
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let store = InMemoryIdempotencyStore::default();
        let key = ("node-a".to_string(), "sig-1".to_string());
        store
            .save(key.clone(), msg(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get(&key).await.is_none());
        assert!(!store.exists(&key).await);
    }

    #[tokio::test]
    async fn capacity_overflow_evicts_soonest_to_expire() {
        let store = InMemoryIdempotencyStore::new(2);
        store
            .save(("a".into(), "1".into()), msg(), Duration::from_secs(1))
            .await
            .unwrap();
        store
            .save(("b".into(), "1".into()), msg(), Duration::from_secs(100))
            .await
            .unwrap();
        store
            .save(("c".into(), "1".into()), msg(), Duration::from_secs(100))
            .await
            .unwrap();
        assert!(!store.exists(&("a".into(), "1".into())).await);
        let stats = store.get_stats().await;
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn vector_cache_put_get_roundtrip() {
        let cache = InMemoryVectorCache::new();
        let entry = VectorCacheEntry {
            key: "corr-1".to_string(),
            vector: vec![0.1, 0.2, 0.3],
            metadata: StdHashMap::new(),
        };
        cache.put(entry.clone(), Duration::from_secs(60)).await.unwrap();
        let got = cache.get("corr-1").await.unwrap();
        assert_eq!(got.vector, entry.vector);
    }
}
