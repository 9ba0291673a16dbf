//! Checkpoint record and store contract.
//!
//! Narrowed to what [`super::runner::CheckpointingRunner`] actually needs to
//! resume a paused or crashed run: the run's identity, the node it was
//! stamped on, and the message itself. There is exactly one state shape here
//! (`Message`), so no generic parameter is needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GraphResult;
use crate::message::Message;

/// One snapshot of an in-flight run, taken after a node completes (on the
/// cadence configured by [`crate::config::CheckpointCadence`]) or right
/// before a run fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub graph_id: String,
    /// The node the message was stamped on when this snapshot was taken —
    /// `resume_from_checkpoint` continues from the edge following this id.
    pub current_node_id: String,
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

/// Persists and retrieves [`Checkpoint`]s keyed by `run_id`. `get_latest` is
/// what `resume_from_checkpoint` reads; `list` exists for inspection and
/// debugging, a plain append history with no branching or checkpoint-id
/// machinery.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, checkpoint: Checkpoint) -> GraphResult<()>;
    async fn get_latest(&self, run_id: &str) -> GraphResult<Option<Checkpoint>>;
    async fn list(&self, run_id: &str) -> GraphResult<Vec<Checkpoint>>;
    async fn delete(&self, run_id: &str) -> GraphResult<()>;
}
