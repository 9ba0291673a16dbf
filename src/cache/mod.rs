//! Idempotency side-cache and vector/intent side-cache.
//!
//! Both follow one contract: async get/set/delete/clear over a
//! `tokio::sync::RwLock<HashMap>`, generalized into two purpose-specific
//! stores plus shared stats/policy types, and (behind the `redis-backend`
//! feature) a Redis Streams-backed idempotency store sharing the same
//! contract.

pub mod in_memory;
#[cfg(feature = "redis-backend")]
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;

/// Error surfaced by a cache backend. Per §7, cache failures never fail a
/// run; callers log and continue — this type exists so backends have
/// something concrete to log.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Snapshot counters for one store (§4.9). Updated under the store's own
/// internal lock; `entries`/`bytes` are point-in-time estimates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: u64,
    pub bytes: u64,
}

/// Per-kind TTL defaults consulted by the idempotency manager and the
/// vector-cache write path (§4.9).
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub tool_call_ttl: Duration,
    pub step_ttl: Duration,
    pub intent_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            tool_call_ttl: Duration::from_secs(300),
            step_ttl: Duration::from_secs(300),
            intent_ttl: Duration::from_secs(3600),
        }
    }
}

/// The key addressing a cached step result: `(nodeId, intentSignature)`.
pub type StepKey = (String, String);

/// Side-cache mapping `(nodeId, intentSignature) -> Message` with TTL and
/// bounded capacity (§4.9, §6 `IdempotencyStore`).
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &StepKey) -> Option<Message>;
    async fn save(&self, key: StepKey, msg: Message, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &StepKey) -> Result<(), CacheError>;
    async fn exists(&self, key: &StepKey) -> bool;
    async fn clear(&self) -> Result<(), CacheError>;
    async fn get_stats(&self) -> CacheStats;
}

/// One entry of the non-authoritative intent-vector side-cache (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorCacheEntry {
    pub key: String,
    pub vector: Vec<f64>,
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
}

/// Optional side-store for intent vectors (§4.10, §6 `VectorCache`).
/// Non-authoritative: failures to record never affect a run.
#[async_trait]
pub trait VectorCache: Send + Sync {
    async fn put(&self, entry: VectorCacheEntry, ttl: Duration) -> Result<(), CacheError>;
    async fn get(&self, key: &str) -> Option<VectorCacheEntry>;
    async fn clear(&self) -> Result<(), CacheError>;
    async fn get_stats(&self) -> CacheStats;
}
