//! Subgraph HITL checkpoint protocol.
//!
//! `SubgraphCheckpointContext` frames are stacked (outermost first) under
//! [`crate::message::reserved_keys::SUBGRAPH_STACK`] in a paused message's
//! metadata. The frame is a plain serializable struct with no behaviour of
//! its own, carried through `serde_json` so it survives a generic key/value
//! encoding round-trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::message::{reserved_keys, Message};

/// One frame of the subgraph pause stack (§3, §6). Field names are
/// bit-exact per §6's reserved metadata schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphCheckpointContext {
    pub parent_node_id: String,
    pub parent_graph_id: String,
    pub parent_run_id: String,
    pub child_graph_id: String,
    pub child_node_id: String,
    pub child_run_id: String,
    pub output_mapping: HashMap<String, String>,
    pub depth: i64,
}

impl SubgraphCheckpointContext {
    /// Decodes a frame from its generic mapping form, dropping it (with a
    /// warning) if a mandatory field is missing or mistyped — "Non-conforming
    /// entries are dropped during deserialisation with a warning" (§6).
    pub fn from_value(value: &Value) -> Option<Self> {
        match serde_json::from_value::<SubgraphCheckpointContext>(value.clone()) {
            Ok(frame) => Some(frame),
            Err(err) => {
                tracing::warn!(?err, "dropping malformed subgraph checkpoint frame");
                None
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("SubgraphCheckpointContext is always JSON-serializable")
    }
}

/// Reads the outermost-first frame stack from a message's metadata. Accepts
/// both a pre-decoded array of frames and a raw JSON array (the "both native
/// and mapping form" requirement of §4.6/§6); non-conforming entries are
/// silently dropped.
pub fn read_stack(message: &Message) -> Vec<SubgraphCheckpointContext> {
    match message.metadata.get(reserved_keys::SUBGRAPH_STACK) {
        Some(Value::Array(items)) => items.iter().filter_map(SubgraphCheckpointContext::from_value).collect(),
        _ => Vec::new(),
    }
}

/// Writes the frame stack back (outermost first) into a message's metadata.
/// Writing an empty stack removes the key entirely.
pub fn write_stack(message: &Message, stack: &[SubgraphCheckpointContext]) -> Message {
    if stack.is_empty() {
        let mut next = message.clone();
        next.metadata.remove(reserved_keys::SUBGRAPH_STACK);
        return next;
    }
    let encoded = Value::Array(stack.iter().map(|f| f.to_value()).collect());
    message.with_metadata(reserved_keys::SUBGRAPH_STACK, encoded)
}

/// Pushes a new outermost frame onto the stack (used when a subgraph pauses
/// and its enclosing `SubgraphNode` wraps the WAITING message for its own
/// parent, §4.6 step 3).
pub fn push_frame(message: &Message, frame: SubgraphCheckpointContext) -> Message {
    let mut stack = read_stack(message);
    stack.insert(0, frame);
    write_stack(message, &stack)
}

/// Pops the outermost frame, returning it plus the message with the
/// remaining stack re-attached.
pub fn pop_frame(message: &Message) -> Option<(SubgraphCheckpointContext, Message)> {
    let mut stack = read_stack(message);
    if stack.is_empty() {
        return None;
    }
    let frame = stack.remove(0);
    Some((frame, write_stack(message, &stack)))
}
