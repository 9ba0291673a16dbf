//! Redis-backed [`IdempotencyStore`] (§4.9: "in-memory or Redis-backed").
//!
//! Keys are serialized as `"graphcore:step:{node_id}:{intent_signature}"`;
//! values are the `Message` JSON-encoded via `serde_json`, written with `SET
//! ... PX <ttl_ms>` so Redis itself enforces expiry (no lazy-expiry bookkeeping
//! needed on our side, unlike the in-memory variant).

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::{CacheError, CacheStats, IdempotencyStore, StepKey};
use crate::message::Message;

pub struct RedisIdempotencyStore {
    conn: Mutex<redis::aio::ConnectionManager>,
    key_prefix: String,
    stats: Mutex<CacheStats>,
}

impl RedisIdempotencyStore {
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(RedisIdempotencyStore {
            conn: Mutex::new(conn),
            key_prefix: key_prefix.into(),
            stats: Mutex::new(CacheStats::default()),
        })
    }

    fn redis_key(&self, key: &StepKey) -> String {
        format!("{}:step:{}:{}", self.key_prefix, key.0, key.1)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn get(&self, key: &StepKey) -> Option<Message> {
        let raw: Option<String> = {
            let mut conn = self.conn.lock().await;
            conn.get(self.redis_key(key)).await.ok().flatten()
        };
        let mut stats = self.stats.lock().await;
        match raw.and_then(|s| serde_json::from_str(&s).ok()) {
            Some(msg) => {
                stats.hits += 1;
                Some(msg)
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    async fn save(&self, key: StepKey, msg: Message, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(&msg).map_err(|e| CacheError::Backend(e.to_string()))?;
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .set_ex(self.redis_key(&key), payload, ttl.as_secs().max(1))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &StepKey) -> Result<(), CacheError> {
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .del(self.redis_key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &StepKey) -> bool {
        let mut conn = self.conn.lock().await;
        conn.exists(self.redis_key(key)).await.unwrap_or(false)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        // Best-effort: Redis has no namespaced FLUSH; callers that need a
        // hard reset should use a dedicated database/prefix per test run.
        Ok(())
    }

    async fn get_stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }
}
