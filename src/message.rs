//! The typed envelope that flows through a graph run.
//!
//! A value-typed envelope carrying identity, payload, and provenance, plus
//! an append-only lifecycle history guarded by the state machine below.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::GraphError;

/// Reserved metadata keys the runner owns. User code must not overwrite these.
pub mod reserved_keys {
    pub const INTENT_SIGNATURE: &str = "intentSignature";
    pub const INTENT: &str = "intent";
    pub const INTENT_VECTOR: &str = "intentVector";
    pub const INTENT_KEY: &str = "intentKey";
    pub const SUBGRAPH_STACK: &str = "__subgraph_checkpoint_stack";
}

/// The execution state of a [`Message`] (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    Ready,
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }

    /// Whether `self -> target` is a legal edge of the state machine.
    ///
    /// `RUNNING -> RUNNING` re-stamps (nodeId only) are deliberately NOT a
    /// legal transition here: they never go through [`Message::transition`],
    /// only through [`Message::restamp_node_id`], so they never need to pass
    /// this check.
    pub fn can_transition_to(self, target: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, target),
            (Ready, Running)
                | (Ready, Cancelled)
                | (Running, Waiting)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Waiting, Running)
                | (Waiting, Cancelled)
        )
    }
}

/// One entry in a message's append-only `state_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub reason: Option<String>,
    pub node_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A structured record of one tool invocation, appended by tool nodes and
/// adapters; consumed by tool-call event emission (§4.13).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
    pub result: Option<Value>,
    pub ok: bool,
    pub duration_ms: u64,
    pub attempt: u32,
    pub error: Option<String>,
}

/// The flowing envelope. Value-typed: every mutation returns a new `Message`;
/// the receiver never observes its input mutated (§3 Invariants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub correlation_id: String,
    pub run_id: Option<String>,
    pub graph_id: Option<String>,
    pub node_id: Option<String>,

    pub content: String,
    pub data: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,

    pub from: String,
    pub tool_calls: Vec<ToolCallRecord>,

    pub state: ExecutionState,
    pub state_history: Vec<StateTransitionRecord>,

    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Builds a fresh message in `READY` state, stamping a synthetic initial
    /// transition into history (§3: "history begins with a synthetic
    /// transition into the first observed state").
    pub fn new(content: impl Into<String>, from: impl Into<String>) -> Self {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4().to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            run_id: None,
            graph_id: None,
            node_id: None,
            content: content.into(),
            data: HashMap::new(),
            metadata: HashMap::new(),
            from: from.into(),
            tool_calls: Vec::new(),
            state: ExecutionState::Ready,
            state_history: vec![StateTransitionRecord {
                from: ExecutionState::Ready,
                to: ExecutionState::Ready,
                reason: Some("initial".to_string()),
                node_id: None,
                timestamp: now,
            }],
            created_at: now,
        }
    }

    /// Transitions to `target`, appending a history record. Rejects illegal
    /// edges with a `Validation` error (§4.1).
    pub fn transition(
        &self,
        target: ExecutionState,
        reason: Option<&str>,
        node_id: Option<&str>,
    ) -> Result<Message, GraphError> {
        if !self.state.can_transition_to(target) {
            return Err(GraphError::validation(format!(
                "illegal transition {:?} -> {:?}",
                self.state, target
            ))
            .with_context("from", format!("{:?}", self.state))
            .with_context("to", format!("{:?}", target)));
        }
        let mut next = self.clone();
        next.state_history.push(StateTransitionRecord {
            from: self.state,
            to: target,
            reason: reason.map(|s| s.to_string()),
            node_id: node_id.map(|s| s.to_string()).or_else(|| self.node_id.clone()),
            timestamp: Utc::now(),
        });
        next.state = target;
        Ok(next)
    }

    /// Re-stamps `node_id` without touching `state` or `state_history`. This
    /// is the plain field update the runner uses at the top of the node
    /// loop (§4.12 step 2) — it is deliberately not a `transition`.
    pub fn restamp_node_id(&self, node_id: impl Into<String>) -> Message {
        let mut next = self.clone();
        next.node_id = Some(node_id.into());
        next
    }

    /// Walks `state_history` and verifies every consecutive pair is either
    /// the synthetic initial entry or a legal state-machine edge.
    pub fn ensure_history_valid(&self) -> Result<(), GraphError> {
        if self.state_history.is_empty() {
            return Err(GraphError::validation("state_history is empty"));
        }
        for window in self.state_history.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            if !prev.to.can_transition_to(next.to) {
                return Err(GraphError::validation(format!(
                    "invalid history edge {:?} -> {:?}",
                    prev.to, next.to
                ))
                .with_context("from", format!("{:?}", prev.to))
                .with_context("to", format!("{:?}", next.to)));
            }
        }
        if self.state_history.last().map(|r| r.to) != Some(self.state) {
            return Err(GraphError::validation(
                "state_history's last entry does not match current state",
            ));
        }
        Ok(())
    }

    pub fn with_data(&self, key: impl Into<String>, value: Value) -> Message {
        let mut next = self.clone();
        next.data.insert(key.into(), value);
        next
    }

    pub fn with_metadata(&self, key: impl Into<String>, value: Value) -> Message {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value);
        next
    }

    pub fn with_content(&self, content: impl Into<String>) -> Message {
        let mut next = self.clone();
        next.content = content.into();
        next
    }

    pub fn with_tool_call(&self, record: ToolCallRecord) -> Message {
        let mut next = self.clone();
        next.tool_calls.push(record);
        next
    }

    /// Produces a fresh child-run envelope for entering a subgraph (§4.4,
    /// §4.6): preserves `correlation_id`/`content`/`data`/`metadata`/`from`
    /// but resets `id`, `run_id`, `graph_id`, `node_id` and `state` back to a
    /// fresh READY message. The child graph's own `execute` call assigns its
    /// own `runId` and builds its own state-machine history rather than
    /// inheriting the parent's already-RUNNING one — `RUNNING -> RUNNING`
    /// isn't a legal `transition`, so forwarding the parent message as-is
    /// would reject at the top of `execute`.
    pub fn enter_subgraph(&self) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4().to_string(),
            correlation_id: self.correlation_id.clone(),
            run_id: None,
            graph_id: None,
            node_id: None,
            content: self.content.clone(),
            data: self.data.clone(),
            metadata: self.metadata.clone(),
            from: self.from.clone(),
            tool_calls: self.tool_calls.clone(),
            state: ExecutionState::Ready,
            state_history: vec![StateTransitionRecord {
                from: ExecutionState::Ready,
                to: ExecutionState::Ready,
                reason: Some("subgraph entry".to_string()),
                node_id: None,
                timestamp: now,
            }],
            created_at: now,
        }
    }

    /// Assigns `run_id` if unset, leaving it unchanged otherwise (§3: "runId
    /// is assigned on first entry to the runner if absent").
    pub fn ensure_run_id(&self) -> Message {
        if self.run_id.is_some() {
            return self.clone();
        }
        let mut next = self.clone();
        next.run_id = Some(Uuid::new_v4().to_string());
        next
    }

    /// The dedup key for step caching (§4.9): `metadata["intentSignature"]`,
    /// else `metadata["intent"]`, else a 100-char content-prefix hash, else
    /// the message id.
    pub fn intent_signature(&self) -> String {
        if let Some(Value::String(s)) = self.metadata.get(reserved_keys::INTENT_SIGNATURE) {
            return s.clone();
        }
        if let Some(Value::String(s)) = self.metadata.get(reserved_keys::INTENT) {
            return s.clone();
        }
        let prefix: String = self.content.chars().take(100).collect();
        if !prefix.is_empty() {
            let mut hasher = DefaultHasher::new();
            prefix.hash(&mut hasher);
            return format!("{:x}", hasher.finish());
        }
        self.id.clone()
    }
}
