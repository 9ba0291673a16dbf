//! Lifecycle event bus and tool-call event channel.
//!
//! Two distinct buses sharing one publish/subscribe shape, built on
//! `tokio_stream`'s broadcast-channel wrapper for fan-out rather than a
//! hand-rolled polling loop. In-memory implementations here; `redis-backend`
//! and `kafka-backend` features add Redis Streams and Kafka variants sharing
//! the same contract.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt as _};

use crate::message::{Message, ToolCallRecord};

/// One of `graph.{id}.{started|completed|failed}`,
/// `node.{graphId}.{nodeId}.{started|completed}`, or
/// `hitl.{graphId}.{nodeId}.requested` (§4.11).
pub type Topic = String;

pub fn graph_topic(graph_id: &str, event: &str) -> Topic {
    format!("graph.{graph_id}.{event}")
}

pub fn node_topic(graph_id: &str, node_id: &str, event: &str) -> Topic {
    format!("node.{graph_id}.{node_id}.{event}")
}

pub fn hitl_topic(graph_id: &str, node_id: &str) -> Topic {
    format!("hitl.{graph_id}.{node_id}.requested")
}

/// The enrichment carried alongside the message on every lifecycle
/// publication (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub topic: Topic,
    pub event: String,
    pub node_id: Option<String>,
    pub message: Message,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Topic/subscribe contract shared by every lifecycle bus backend (§4.11,
/// §6). `publish` failures are logged, never propagated into the run (§7).
#[async_trait]
pub trait LifecycleEventBus: Send + Sync {
    async fn publish(&self, event: LifecycleEvent);
    async fn subscribe(&self, topic_prefix: &str) -> Box<dyn Stream<Item = LifecycleEvent> + Send + Unpin>;
    /// Replay buffer, newest-first eviction, if history is enabled (§4.11).
    async fn history(&self, topic_prefix: &str) -> Vec<LifecycleEvent>;
}

/// A tool call observed on a message after a node completes (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEmitted {
    pub tool_call: ToolCallRecord,
    pub message: Message,
    pub emitted_by: String,
    pub graph_id: Option<String>,
    pub run_id: Option<String>,
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait ToolCallEventBus: Send + Sync {
    async fn publish(&self, event: ToolCallEmitted);
    async fn subscribe(&self) -> Box<dyn Stream<Item = ToolCallEmitted> + Send + Unpin>;
    async fn history(&self) -> Vec<ToolCallEmitted>;
}

/// Shared broadcast-queue backend with a bounded, newest-first-eviction
/// replay history (§4.11). Subscribers only see events published after they
/// subscribe (standard `tokio::sync::broadcast` semantics); `history` serves
/// anything published before that.
pub struct InMemoryLifecycleEventBus {
    tx: broadcast::Sender<LifecycleEvent>,
    history: Mutex<VecDeque<LifecycleEvent>>,
    history_size: usize,
}

impl InMemoryLifecycleEventBus {
    pub fn new(history_size: usize) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        InMemoryLifecycleEventBus {
            tx,
            history: Mutex::new(VecDeque::new()),
            history_size,
        }
    }
}

impl Default for InMemoryLifecycleEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl LifecycleEventBus for InMemoryLifecycleEventBus {
    async fn publish(&self, event: LifecycleEvent) {
        if self.history_size > 0 {
            let mut history = self.history.lock().await;
            history.push_back(event.clone());
            while history.len() > self.history_size {
                history.pop_front();
            }
        }
        // A send error just means there are no subscribers right now;
        // per §7 event-bus failures never stall the run.
        let _ = self.tx.send(event);
    }

    async fn subscribe(&self, topic_prefix: &str) -> Box<dyn Stream<Item = LifecycleEvent> + Send + Unpin> {
        let prefix = topic_prefix.to_string();
        let stream = BroadcastStream::new(self.tx.subscribe())
            .filter_map(move |res| res.ok())
            .filter(move |event: &LifecycleEvent| event.topic.starts_with(&prefix));
        Box::new(Box::pin(stream))
    }

    async fn history(&self, topic_prefix: &str) -> Vec<LifecycleEvent> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|e| e.topic.starts_with(topic_prefix))
            .cloned()
            .collect()
    }
}

pub struct InMemoryToolCallEventBus {
    tx: broadcast::Sender<ToolCallEmitted>,
    history: Mutex<VecDeque<ToolCallEmitted>>,
    history_size: usize,
}

impl InMemoryToolCallEventBus {
    pub fn new(history_size: usize) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        InMemoryToolCallEventBus {
            tx,
            history: Mutex::new(VecDeque::new()),
            history_size,
        }
    }
}

impl Default for InMemoryToolCallEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ToolCallEventBus for InMemoryToolCallEventBus {
    async fn publish(&self, event: ToolCallEmitted) {
        if self.history_size > 0 {
            let mut history = self.history.lock().await;
            history.push_back(event.clone());
            while history.len() > self.history_size {
                history.pop_front();
            }
        }
        let _ = self.tx.send(event);
    }

    async fn subscribe(&self) -> Box<dyn Stream<Item = ToolCallEmitted> + Send + Unpin> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|res| res.ok());
        Box::new(Box::pin(stream))
    }

    async fn history(&self) -> Vec<ToolCallEmitted> {
        self.history.lock().await.iter().cloned().collect()
    }
}

/// Convenience bundle so `GraphBuilder` can wire both buses with one
/// optional collaborator.
#[derive(Clone)]
pub struct EventBuses {
    pub lifecycle: Arc<dyn LifecycleEventBus>,
    pub tool_calls: Arc<dyn ToolCallEventBus>,
}

impl EventBuses {
    pub fn in_memory() -> Self {
        EventBuses {
            lifecycle: Arc::new(InMemoryLifecycleEventBus::default()),
            tool_calls: Arc::new(InMemoryToolCallEventBus::default()),
        }
    }
}
