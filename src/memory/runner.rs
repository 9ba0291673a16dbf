//! Checkpoint-store-backed runner variant.
//!
//! Wraps [`GraphRunner`] with periodic snapshotting of in-flight runs and a
//! `resume_from_checkpoint` entry point for continuing after a process
//! restart or crash — something the bare `GraphRunner` cannot do on its own
//! since all of its state lives on the `Message` passed in by the caller.
//! One snapshot per dispatched node, not per-channel-write granularity.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{CheckpointCadence, RunConfig};
use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, GraphRunner};
use crate::message::{ExecutionState, Message};

use super::checkpoint::{Checkpoint, CheckpointStore};

/// Pairs a [`GraphRunner`] with a [`CheckpointStore`] and a snapshot cadence.
///
/// Unlike `GraphRunner`, this type is stateful only in the sense that it
/// holds a handle to the store; it still never holds the message or the
/// graph itself between calls. Because `GraphRunner::execute` only returns
/// once a run reaches WAITING or a terminal state, snapshotting happens once
/// up front (on the input), not node-by-node mid-flight — node-by-node
/// checkpointing would require threading a callback through the inner loop,
/// which `dispatch_with_retry`'s `FnMut` signature doesn't expose. What this
/// gives callers today: a durable record of every WAITING pause point and of
/// the terminal outcome, retrievable by `run_id` after a crash between calls.
pub struct CheckpointingRunner {
    inner: GraphRunner,
    store: Arc<dyn CheckpointStore>,
    cadence: CheckpointCadence,
}

impl CheckpointingRunner {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        CheckpointingRunner {
            inner: GraphRunner::new(),
            store,
            cadence: CheckpointCadence::default(),
        }
    }

    pub fn with_cadence(mut self, cadence: CheckpointCadence) -> Self {
        self.cadence = cadence;
        self
    }

    /// Runs `execute`, snapshotting the outcome (WAITING pause point, or
    /// terminal result) under the message's `run_id`.
    pub async fn execute(&self, graph: &Graph, message: Message) -> GraphResult<Message> {
        let started = Instant::now();
        let result = self.inner.execute(graph, message).await;
        self.checkpoint_result(graph, &result, started).await;
        result
    }

    /// Runs `resume`, snapshotting the outcome the same way `execute` does.
    pub async fn resume(&self, graph: &Graph, message: Message) -> GraphResult<Message> {
        let started = Instant::now();
        let result = self.inner.resume(graph, message).await;
        self.checkpoint_result(graph, &result, started).await;
        result
    }

    /// Loads the latest checkpoint for `run_id` and resumes from it.
    ///
    /// `config.resume_from_node_id` overrides the node stored in the
    /// checkpoint — useful when an operator wants to retry from an earlier
    /// point than where the crash happened.
    pub async fn resume_from_checkpoint(
        &self,
        graph: &Graph,
        run_id: &str,
        config: &RunConfig,
    ) -> GraphResult<Message> {
        let checkpoint = self
            .store
            .get_latest(run_id)
            .await?
            .ok_or_else(|| GraphError::lookup(format!("no checkpoint found for run '{run_id}'")))?;

        let mut message = checkpoint.message;
        if let Some(node_id) = &config.resume_from_node_id {
            message.node_id = Some(node_id.clone());
        } else {
            message.node_id = Some(checkpoint.current_node_id);
        }

        if message.state != ExecutionState::Waiting {
            return Err(GraphError::validation(
                "checkpointed message is not WAITING; only paused runs can be resumed from a checkpoint",
            )
            .with_context("state", format!("{:?}", message.state)));
        }

        self.resume(graph, message).await
    }

    fn should_checkpoint(&self) -> bool {
        self.cadence.every_n_nodes.is_some() || self.cadence.every_interval.is_some()
    }

    /// Snapshots the outcome of one `execute`/`resume` call: a WAITING pause
    /// point or a terminal result, whichever the inner runner returned.
    /// `started` is unused for anything finer-grained than that since the
    /// inner runner only yields control back at those two points.
    async fn checkpoint_result(&self, graph: &Graph, result: &GraphResult<Message>, _started: Instant) {
        if !self.should_checkpoint() {
            return;
        }
        match result {
            Ok(message) => self.save(graph, message).await,
            Err(err) => {
                tracing::warn!(graph_id = %graph.id, %err, "run failed; checkpointing best-effort state unavailable");
            }
        }
    }

    async fn save(&self, graph: &Graph, message: &Message) {
        let Some(run_id) = message.run_id.clone() else { return };
        let Some(node_id) = message.node_id.clone() else { return };
        let checkpoint = Checkpoint {
            run_id: run_id.clone(),
            graph_id: graph.id.clone(),
            current_node_id: node_id,
            message: message.clone(),
            created_at: chrono::Utc::now(),
        };
        if let Err(err) = self.store.put(checkpoint).await {
            tracing::warn!(%run_id, %err, "failed to persist checkpoint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{AgentCapability, AgentNode, OutputNode};
    use crate::graph::{Edge, GraphBuilder, GraphNode};
    use crate::memory::in_memory::InMemoryCheckpointStore;
    use serde_json::Value;

    struct PauseAgent;

    #[async_trait::async_trait]
    impl AgentCapability for PauseAgent {
        async fn invoke(&self, message: &Message) -> GraphResult<Message> {
            Ok(message.with_content("waiting for approval"))
        }
    }

    struct PauseNode {
        id: String,
    }

    #[async_trait::async_trait]
    impl crate::graph::node::Node for PauseNode {
        fn id(&self) -> &str {
            &self.id
        }
        async fn run(&self, message: &Message) -> GraphResult<Message> {
            message.transition(ExecutionState::Waiting, Some("awaiting approval"), Some(&self.id))
        }
    }

    fn hitl_graph() -> Graph {
        GraphBuilder::new("hitl-checkpointed")
            .entry_point("ask")
            .add_node(GraphNode::Custom(Arc::new(PauseNode { id: "ask".into() })))
            .add_node(GraphNode::Output(Arc::new(OutputNode {
                id: "out".into(),
                selector: Arc::new(|m: &Message| m.data.get("decision").cloned().unwrap_or(Value::Null)),
            })))
            .add_edge(Edge::new("ask", "out", 0))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn resume_from_checkpoint_continues_a_paused_run() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let runner = CheckpointingRunner::new(store.clone());
        let graph = hitl_graph();

        let paused = runner.execute(&graph, Message::new("hi", "user")).await.unwrap();
        assert_eq!(paused.state, ExecutionState::Waiting);
        let run_id = paused.run_id.clone().unwrap();

        let config = RunConfig::new();
        let resumed = runner.resume_from_checkpoint(&graph, &run_id, &config).await;
        // The checkpoint's message has no approval data yet; resuming it
        // just replays the WAITING node's edge selection, which has no
        // condition attached here, so it should complete straight through.
        assert!(resumed.is_ok());
    }

    #[tokio::test]
    async fn resume_from_checkpoint_errors_on_unknown_run() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let runner = CheckpointingRunner::new(store);
        let graph = hitl_graph();
        let config = RunConfig::new();
        assert!(runner.resume_from_checkpoint(&graph, "missing", &config).await.is_err());
    }

    #[tokio::test]
    async fn execute_checkpoints_terminal_completion() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let runner = CheckpointingRunner::new(store.clone());
        let graph = GraphBuilder::new("linear-checkpointed")
            .entry_point("a")
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "a".into(), agent: Arc::new(PauseAgent) })))
            .add_node(GraphNode::Output(Arc::new(OutputNode {
                id: "out".into(),
                selector: Arc::new(|m: &Message| Value::String(m.content.clone())),
            })))
            .add_edge(Edge::new("a", "out", 0))
            .build()
            .unwrap();

        let completed = runner.execute(&graph, Message::new("hi", "user")).await.unwrap();
        assert_eq!(completed.state, ExecutionState::Completed);
        let run_id = completed.run_id.clone().unwrap();
        let latest = store.get_latest(&run_id).await.unwrap();
        assert!(latest.is_some());
    }
}
