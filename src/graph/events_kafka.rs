//! Kafka-backed lifecycle event bus (§4.11).
//!
//! Topic-per-prefix, consumer-group delivery, polled via `rdkafka`'s
//! `StreamConsumer`. Shares the same publish/subscribe contract as the
//! in-memory and Redis Streams backends.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use super::events::LifecycleEvent;
use crate::cache::CacheError;

pub struct KafkaLifecycleEventBus {
    producer: FutureProducer,
    brokers: String,
    topic_prefix: String,
    group_id: String,
}

impl KafkaLifecycleEventBus {
    pub fn new(brokers: &str, topic_prefix: impl Into<String>, group_id: impl Into<String>) -> Result<Self, CacheError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(KafkaLifecycleEventBus {
            producer,
            brokers: brokers.to_string(),
            topic_prefix: topic_prefix.into(),
            group_id: group_id.into(),
        })
    }

    fn topic_for(&self, topic: &str) -> String {
        format!("{}.{}", self.topic_prefix, topic.replace('.', "_"))
    }
}

#[async_trait]
impl super::events::LifecycleEventBus for KafkaLifecycleEventBus {
    async fn publish(&self, event: LifecycleEvent) {
        let Ok(payload) = serde_json::to_string(&event) else {
            return;
        };
        let topic = self.topic_for(&event.topic);
        let record = FutureRecord::to(&topic).payload(&payload).key(&event.topic);
        if let Err((err, _)) = self.producer.send(record, Duration::from_secs(5)).await {
            tracing::warn!(?err, "kafka lifecycle bus: publish failed (best-effort, ignored)");
        }
    }

    async fn subscribe(&self, topic_prefix: &str) -> Box<dyn Stream<Item = LifecycleEvent> + Send + Unpin> {
        let (tx, rx) = mpsc::channel(256);
        let topic = self.topic_for(topic_prefix);
        let consumer: Result<StreamConsumer, _> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .create();
        if let Ok(consumer) = consumer {
            if consumer.subscribe(&[&topic]).is_ok() {
                tokio::spawn(async move {
                    loop {
                        if tx.is_closed() {
                            return;
                        }
                        match consumer.recv().await {
                            Ok(msg) => {
                                if let Some(payload) = msg.payload() {
                                    if let Ok(s) = std::str::from_utf8(payload) {
                                        if let Ok(event) = serde_json::from_str::<LifecycleEvent>(s) {
                                            let _ = tx.send(event).await;
                                        }
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::warn!(?err, "kafka lifecycle bus: recv error");
                            }
                        }
                    }
                });
            }
        }
        Box::new(ReceiverStream::new(rx))
    }

    /// Kafka's own retention handles replay; this core doesn't separately
    /// buffer history for the Kafka backend (unlike in-memory/Redis).
    async fn history(&self, _topic_prefix: &str) -> Vec<LifecycleEvent> {
        Vec::new()
    }
}
