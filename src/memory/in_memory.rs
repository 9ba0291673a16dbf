//! In-memory [`CheckpointStore`].
//!
//! A `tokio::sync::RwLock`-guarded map keyed by run/thread id, each holding
//! the checkpoints for that run newest-last. Not persistent; for dev, tests,
//! and single-process deployments — production use wants
//! [`super::sqlite_store::SqliteCheckpointStore`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::GraphResult;

pub struct InMemoryCheckpointStore {
    by_run: Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        InMemoryCheckpointStore {
            by_run: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> GraphResult<()> {
        let mut guard = self.by_run.write().await;
        guard.entry(checkpoint.run_id.clone()).or_default().push(checkpoint);
        Ok(())
    }

    async fn get_latest(&self, run_id: &str) -> GraphResult<Option<Checkpoint>> {
        let guard = self.by_run.read().await;
        Ok(guard.get(run_id).and_then(|list| list.last().cloned()))
    }

    async fn list(&self, run_id: &str) -> GraphResult<Vec<Checkpoint>> {
        let guard = self.by_run.read().await;
        Ok(guard.get(run_id).cloned().unwrap_or_default())
    }

    async fn delete(&self, run_id: &str) -> GraphResult<()> {
        self.by_run.write().await.remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn checkpoint(run_id: &str, node_id: &str) -> Checkpoint {
        Checkpoint {
            run_id: run_id.to_string(),
            graph_id: "g1".to_string(),
            current_node_id: node_id.to_string(),
            message: Message::new("hi", "user"),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_latest_returns_most_recent_put() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("r1", "a")).await.unwrap();
        store.put(checkpoint("r1", "b")).await.unwrap();
        let latest = store.get_latest("r1").await.unwrap().unwrap();
        assert_eq!(latest.current_node_id, "b");
    }

    #[tokio::test]
    async fn list_returns_all_checkpoints_in_order() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("r1", "a")).await.unwrap();
        store.put(checkpoint("r1", "b")).await.unwrap();
        let list = store.list("r1").await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].current_node_id, "a");
        assert_eq!(list[1].current_node_id, "b");
    }

    #[tokio::test]
    async fn unknown_run_id_yields_none_and_empty_list() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.get_latest("missing").await.unwrap().is_none());
        assert!(store.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_clears_a_run() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("r1", "a")).await.unwrap();
        store.delete("r1").await.unwrap();
        assert!(store.get_latest("r1").await.unwrap().is_none());
    }
}
