//! Graph Runner: orchestration loop.
//!
//! Ties validation, the state machine, per-node dispatch, edge selection,
//! idempotency, events, middleware, and retry together. A `Graph` is built
//! once and executed many times against the same immutable structure, with a
//! single `Message`-shaped node loop rather than generic channel versions.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use crate::cache::{CacheError, StepKey};
use crate::error::{GraphError, GraphResult};
use crate::message::{reserved_keys, ExecutionState, Message};

use super::events::{graph_topic, hitl_topic, node_topic, LifecycleEvent, ToolCallEmitted};
use super::logging;
use super::middleware::{run_after_chain, run_before_chain, run_error_chain, ErrorAction};
use super::node::GraphNode;
use super::retry::{execute_with_retry, RetryOutcome, RetryPolicy};
use super::subgraph::{self, SubgraphCheckpointContext};
use super::tool::ToolContext;
use super::{select_next_edge, Graph};

/// The default retry policy used when a graph enables retry (`retryEnabled`
/// or a present `retryPolicy`) without supplying one of its own (§4.8).
fn default_retry_policy() -> RetryPolicy {
    RetryPolicy::exponential(3, Duration::from_millis(100), 2.0, Duration::from_secs(5))
}

/// Stateless orchestrator: all mutable state lives on the [`Message`] and the
/// collaborators hanging off [`Graph`]. Safe to share across concurrent runs;
/// cheap to construct per call.
#[derive(Default)]
pub struct GraphRunner;

impl GraphRunner {
    pub fn new() -> Self {
        GraphRunner
    }

    /// `execute(graph, message)` (§4.12).
    ///
    /// Boxed via `async_recursion`: `SubgraphNode` dispatch calls back into
    /// `execute` for the child graph, so this function is indirectly
    /// recursive through `dispatch_node`.
    #[async_recursion::async_recursion]
    pub async fn execute(&self, graph: &Graph, message: Message) -> GraphResult<Message> {
        super::validate_graph(graph)?;
        message.ensure_history_valid()?;

        self.record_intent_vector(graph, &message).await;

        if message.state.is_terminal() {
            return Err(GraphError::validation("cannot execute a terminal message")
                .with_context("state", format!("{:?}", message.state)));
        }

        let running = message.transition(ExecutionState::Running, Some("run started"), None)?;
        running.ensure_history_valid()?;

        let stamped = running.ensure_run_id();
        let mut current = Message {
            graph_id: Some(graph.id.clone()),
            node_id: None,
            ..stamped
        };

        let span = logging::run_span(&graph.id, current.run_id.as_deref().unwrap_or_default());
        async move {
            logging::log_run_started(&graph.id, &graph.entry_point);

            self.publish_graph_event(graph, &current, "started").await;

            current = current.restamp_node_id(graph.entry_point.clone());
            self.run_node_loop(graph, current).await
        }
        .instrument(span)
        .await
    }

    /// `resume(graph, message)` (§4.12, §4.6).
    #[async_recursion::async_recursion]
    pub async fn resume(&self, graph: &Graph, message: Message) -> GraphResult<Message> {
        if message.state != ExecutionState::Waiting {
            return Err(GraphError::validation("resume requires a WAITING message")
                .with_context("state", format!("{:?}", message.state)));
        }

        if let Some((frame, remaining)) = subgraph::pop_frame(&message) {
            return self.resume_subgraph(graph, message, frame, remaining).await;
        }

        let node_id = message
            .node_id
            .clone()
            .ok_or_else(|| GraphError::execution("WAITING message has no nodeId to resume from"))?;
        let running = message.transition(ExecutionState::Running, Some("resumed"), Some(&node_id))?;

        let next_id = match select_next_edge(graph, &node_id, &running) {
            Some(edge) => edge.to.clone(),
            None => {
                let completed = running.transition(ExecutionState::Completed, Some("no more nodes"), None)?;
                self.publish_graph_event(graph, &completed, "completed").await;
                return Ok(completed);
            }
        };

        self.run_node_loop(graph, running.restamp_node_id(next_id)).await
    }

    /// §4.6 steps 2-4: reconstruct the child-facing message, recurse into the
    /// child graph's own `resume`, then either repackage a nested WAITING or
    /// promote a COMPLETED child back into the parent's scope.
    async fn resume_subgraph(
        &self,
        parent_graph: &Graph,
        original: Message,
        frame: SubgraphCheckpointContext,
        remaining_stack: Message,
    ) -> GraphResult<Message> {
        let subgraph_node = parent_graph
            .nodes
            .get(&frame.parent_node_id)
            .ok_or_else(|| GraphError::execution("subgraph checkpoint frame references unknown parent node"))?;
        let child_graph = match subgraph_node {
            GraphNode::Subgraph(n) => n.child_graph.clone(),
            _ => return Err(GraphError::execution("subgraph checkpoint frame's parentNodeId is not a SubgraphNode")),
        };

        let mut child_message = remaining_stack;
        child_message.graph_id = Some(frame.child_graph_id.clone());
        child_message.node_id = Some(frame.child_node_id.clone());
        child_message.run_id = Some(frame.child_run_id.clone());

        let child_result = self.resume(&child_graph, child_message).await?;

        if child_result.state == ExecutionState::Waiting {
            // Same reasoning as the execute-side dispatch: if resuming this
            // level itself paused on a freshly-entered nested subgraph,
            // `child_result` now carries its own stack whose outermost frame
            // is the authoritative childNodeId/childRunId for this level.
            let existing_stack = subgraph::read_stack(&child_result);
            let (child_node_id, child_run_id) = match existing_stack.first() {
                Some(top) => (top.parent_node_id.clone(), top.parent_run_id.clone()),
                None => (
                    child_result.node_id.clone().unwrap_or_else(|| frame.child_node_id.clone()),
                    child_result.run_id.clone().unwrap_or_else(|| frame.child_run_id.clone()),
                ),
            };
            let repackaged_frame = SubgraphCheckpointContext {
                child_node_id,
                child_run_id,
                ..frame.clone()
            };
            let repackaged = subgraph::push_frame(&child_result, repackaged_frame);
            return Ok(repackaged);
        }

        if child_result.state != ExecutionState::Completed {
            return Ok(child_result);
        }

        // §9 Open Question #2: never construct an illegal COMPLETED-child ->
        // RUNNING-parent edge. Clone the pre-pause parent message (`original`,
        // still WAITING, scoped to the parent) and legally transition it
        // WAITING -> RUNNING, then splice in the child's promoted output.
        let mut promoted = original.transition(ExecutionState::Running, Some("subgraph resumed"), Some(&frame.parent_node_id))?;
        promoted.graph_id = Some(frame.parent_graph_id.clone());
        promoted.run_id = Some(frame.parent_run_id.clone());
        for (parent_key, child_key) in &frame.output_mapping {
            if let Some(v) = child_result.data.get(child_key) {
                promoted.data.insert(parent_key.clone(), v.clone());
            }
        }
        // `original` still carries the full pre-pause checkpoint stack (every
        // frame in this resume chain, including ones the recursive `resume`
        // above already consumed) — strip it entirely now that this frame is
        // resolved, per §4.6 step 4 ("strip the frame").
        let promoted = subgraph::write_stack(&promoted, &[]);
        promoted.ensure_history_valid()?;

        let next_id = match select_next_edge(parent_graph, &frame.parent_node_id, &promoted) {
            Some(edge) => edge.to.clone(),
            None => {
                let completed = promoted.transition(ExecutionState::Completed, Some("no more nodes"), None)?;
                self.publish_graph_event(parent_graph, &completed, "completed").await;
                return Ok(completed);
            }
        };

        self.run_node_loop(parent_graph, promoted.restamp_node_id(next_id)).await
    }

    /// The node loop shared by `execute` and the non-subgraph branch of
    /// `resume` (§4.12).
    async fn run_node_loop(&self, graph: &Graph, mut current: Message) -> GraphResult<Message> {
        loop {
            let node_id = current
                .node_id
                .clone()
                .ok_or_else(|| GraphError::execution("node loop entered without a nodeId"))?;
            let node = graph
                .nodes
                .get(&node_id)
                .ok_or_else(|| GraphError::execution(format!("unknown node id '{node_id}'")))?
                .clone();

            let step_key: StepKey = (node_id.clone(), current.intent_signature());
            let idempotency_enabled = graph.idempotency_store.is_some();

            let step_key_display = format!("{}:{}", step_key.0, step_key.1);
            if idempotency_enabled {
                let cached = match &graph.idempotency_store {
                    Some(store) => store.get(&step_key).await,
                    None => None,
                };
                if let Some(cached) = cached {
                    logging::log_cache_hit(&node_id, &step_key_display);
                    let after = run_after_chain(&graph.middleware, cached).await?;
                    match self.advance_or_finish(graph, &node_id, after).await? {
                        Ok(next) => {
                            current = next;
                            continue;
                        }
                        Err(done) => return Ok(done),
                    }
                }
                logging::log_cache_miss(&node_id, &step_key_display);
            }

            logging::log_node_started(&node_id, 1);
            self.publish_node_event(graph, &current, &node_id, "started").await;

            let before = run_before_chain(&graph.middleware, current.clone()).await?;

            let dispatch_result = self.dispatch_with_retry(graph, &node, &before).await;

            match dispatch_result {
                Ok(result) => {
                    let after = run_after_chain(&graph.middleware, result).await?;
                    after.ensure_history_valid()?;

                    if let Some(store) = &graph.idempotency_store {
                        let ttl = graph.cache_policy.step_ttl;
                        if let Err(err) = store.save(step_key, after.clone(), ttl).await {
                            self.log_cache_error(&err);
                        }
                    }

                    logging::log_node_completed(&node_id, &format!("{:?}", after.state));
                    self.publish_tool_call_events(graph, &after, &node_id).await;
                    self.publish_node_event(graph, &after, &node_id, "completed").await;

                    if after.state == ExecutionState::Waiting {
                        logging::log_run_waiting(&graph.id, after.run_id.as_deref().unwrap_or_default(), &node_id);
                        self.publish_hitl_event(graph, &after, &node_id).await;
                        return Ok(after);
                    }

                    if after.state.is_terminal() {
                        let event = if after.state == ExecutionState::Completed { "completed" } else { "failed" };
                        if after.state == ExecutionState::Completed {
                            logging::log_run_completed(&graph.id, after.run_id.as_deref().unwrap_or_default());
                        }
                        self.publish_graph_event(graph, &after, event).await;
                        return Ok(after);
                    }

                    match select_next_edge(graph, &node_id, &after) {
                        Some(edge) => {
                            logging::log_edge_selected(&node_id, &edge.to, edge.is_fallback);
                            current = after.restamp_node_id(edge.to.clone());
                        }
                        None => {
                            logging::log_no_edge(&node_id);
                            let completed = after.transition(ExecutionState::Completed, Some("no more nodes"), None)?;
                            logging::log_run_completed(&graph.id, completed.run_id.as_deref().unwrap_or_default());
                            self.publish_graph_event(graph, &completed, "completed").await;
                            return Ok(completed);
                        }
                    }
                }
                Err(err) => {
                    logging::log_node_error(&node_id, &err);
                    let action = run_error_chain(&graph.middleware, &err, &before).await;
                    match action {
                        ErrorAction::Skip => {
                            match select_next_edge(graph, &node_id, &before) {
                                Some(edge) => current = before.restamp_node_id(edge.to.clone()),
                                None => {
                                    let completed = before.transition(ExecutionState::Completed, Some("no more nodes"), None)?;
                                    self.publish_graph_event(graph, &completed, "completed").await;
                                    return Ok(completed);
                                }
                            }
                        }
                        ErrorAction::Retry => {
                            current = before;
                        }
                        ErrorAction::Fallback(substitute) => {
                            current = *substitute;
                        }
                        ErrorAction::Propagate => {
                            let failed = before.transition(ExecutionState::Failed, Some(err.to_string().as_str()), Some(&node_id))?;
                            let failed = failed.with_tool_call(crate::message::ToolCallRecord {
                                name: "error-report".to_string(),
                                arguments: serde_json::Value::Null,
                                result: None,
                                ok: false,
                                duration_ms: 0,
                                attempt: 1,
                                error: Some(err.to_string()),
                            });
                            logging::log_run_failed(&graph.id, failed.run_id.as_deref().unwrap_or_default(), &err);
                            self.publish_graph_event(graph, &failed, "failed").await;
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// Used only from the idempotency-cache-hit path: re-runs edge selection
    /// and terminal handling without re-dispatching the node. `Ok` carries
    /// the next message to continue the loop with; `Err` (not a failure —
    /// reused as a two-armed return) carries the final message to return
    /// from the run.
    async fn advance_or_finish(&self, graph: &Graph, node_id: &str, message: Message) -> GraphResult<Result<Message, Message>> {
        self.publish_tool_call_events(graph, &message, node_id).await;
        self.publish_node_event(graph, &message, node_id, "completed").await;

        if message.state == ExecutionState::Waiting {
            self.publish_hitl_event(graph, &message, node_id).await;
            return Ok(Err(message));
        }
        if message.state.is_terminal() {
            let event = if message.state == ExecutionState::Completed { "completed" } else { "failed" };
            self.publish_graph_event(graph, &message, event).await;
            return Ok(Err(message));
        }
        match select_next_edge(graph, node_id, &message) {
            Some(edge) => Ok(Ok(message.restamp_node_id(edge.to.clone()))),
            None => {
                let completed = message.transition(ExecutionState::Completed, Some("no more nodes"), None)?;
                self.publish_graph_event(graph, &completed, "completed").await;
                Ok(Err(completed))
            }
        }
    }

    /// Dispatch rules (§4.12 step 6): `ToolNode` resolves then invokes with
    /// listeners; `SubgraphNode` recurses using **this** runner so retry and
    /// middleware propagate; everything else goes through plain `run`. All
    /// three paths are wrapped in the retry supervisor when retry is enabled.
    async fn dispatch_with_retry(&self, graph: &Graph, node: &GraphNode, message: &Message) -> GraphResult<Message> {
        let retry_enabled = graph.retry_is_enabled();
        if !retry_enabled {
            return self.dispatch_node(graph, node, message, 1).await;
        }
        let owned_policy = graph.retry_policy.clone().unwrap_or_else(default_retry_policy);
        let node_id = node.id().to_string();
        let outcome = execute_with_retry(&owned_policy, &node_id, |attempt| {
            let graph = graph;
            let node = node;
            let message = message.clone();
            async move { self.dispatch_node(graph, node, &message, attempt).await }
        })
        .await;
        match outcome {
            RetryOutcome::Success(msg) => Ok(msg),
            RetryOutcome::Exhausted(err) => {
                logging::log_retry_exhausted(&node_id, owned_policy.max_attempts);
                Err(err)
            }
            RetryOutcome::NotRetryable(err) => Err(err),
        }
    }

    async fn dispatch_node(&self, graph: &Graph, node: &GraphNode, message: &Message, attempt: u32) -> GraphResult<Message> {
        match node {
            GraphNode::Tool(tool_node) => {
                let tool = tool_node.resolver.resolve(message).await?;
                let params = tool_node.params_from(message);
                let ctx = ToolContext {
                    run_id: message.run_id.clone(),
                    graph_id: message.graph_id.clone(),
                    node_id: message.node_id.clone(),
                    attempt,
                };
                let start = std::time::Instant::now();
                let outcome = super::listeners::invoke_tool_with_listeners(
                    tool.clone(),
                    params.clone(),
                    ctx,
                    attempt,
                    &graph.tool_lifecycle_listeners,
                )
                .await;
                let duration_ms = start.elapsed().as_millis() as u64;
                match outcome {
                    Ok(result) => {
                        let record = crate::message::ToolCallRecord {
                            name: tool.name().to_string(),
                            arguments: params,
                            result: result.value.clone(),
                            ok: result.ok,
                            duration_ms,
                            attempt,
                            error: result.error.clone(),
                        };
                        Ok(super::node::ToolNode::apply_result(message, record, result.value.clone(), &result.metadata))
                    }
                    Err(err) => Err(err),
                }
            }
            GraphNode::Subgraph(subgraph_node) => {
                let child_input = message.enter_subgraph();
                let child_result = self.execute(&subgraph_node.child_graph, child_input).await?;
                if child_result.state == ExecutionState::Waiting {
                    // If the child graph itself paused on a nested subgraph, the
                    // already-pushed outermost frame on its stack records *its
                    // own* pause point (parentNodeId/parentRunId scoped to the
                    // child graph) — that's what this level's frame needs as
                    // childNodeId/childRunId. `child_result.node_id`/`run_id`
                    // only describe the innermost graph and would be wrong here.
                    let existing_stack = subgraph::read_stack(&child_result);
                    let (child_node_id, child_run_id) = match existing_stack.first() {
                        Some(top) => (top.parent_node_id.clone(), top.parent_run_id.clone()),
                        None => (
                            child_result.node_id.clone().unwrap_or_default(),
                            child_result.run_id.clone().unwrap_or_default(),
                        ),
                    };
                    let frame = SubgraphCheckpointContext {
                        parent_node_id: subgraph_node.id.clone(),
                        parent_graph_id: graph.id.clone(),
                        parent_run_id: message.run_id.clone().unwrap_or_default(),
                        child_graph_id: subgraph_node.child_graph.id.clone(),
                        child_node_id,
                        child_run_id,
                        output_mapping: subgraph_node.output_mapping.clone(),
                        depth: existing_stack.len() as i64 + 1,
                    };
                    return Ok(subgraph::push_frame(&child_result, frame));
                }
                let mut next = message.clone();
                for (parent_key, child_key) in &subgraph_node.output_mapping {
                    if let Some(v) = child_result.data.get(child_key) {
                        next.data.insert(parent_key.clone(), v.clone());
                    }
                }
                Ok(next)
            }
            other => other.run_plain(message).await,
        }
    }

    async fn record_intent_vector(&self, graph: &Graph, message: &Message) {
        let Some(cache) = &graph.vector_cache else { return };
        let Some(serde_json::Value::Array(items)) = message.metadata.get(reserved_keys::INTENT_VECTOR) else {
            return;
        };
        let vector: Vec<f64> = items.iter().filter_map(|v| v.as_f64()).collect();
        let key = message
            .metadata
            .get(reserved_keys::INTENT_KEY)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| message.correlation_id.clone());
        let entry = crate::cache::VectorCacheEntry {
            key,
            vector,
            metadata: std::collections::HashMap::from([
                ("correlationId".to_string(), serde_json::Value::String(message.correlation_id.clone())),
                ("from".to_string(), serde_json::Value::String(message.from.clone())),
                ("graphId".to_string(), serde_json::Value::String(graph.id.clone())),
            ]),
        };
        if let Err(err) = cache.put(entry, graph.cache_policy.intent_ttl).await {
            self.log_cache_error(&err);
        }
    }

    fn log_cache_error(&self, err: &CacheError) {
        logging::log_cache_error(err);
    }

    async fn publish_graph_event(&self, graph: &Graph, message: &Message, event: &str) {
        let Some(buses) = &graph.event_buses else { return };
        buses
            .lifecycle
            .publish(LifecycleEvent {
                topic: graph_topic(&graph.id, event),
                event: event.to_string(),
                node_id: message.node_id.clone(),
                message: message.clone(),
                timestamp: chrono::Utc::now(),
            })
            .await;
    }

    async fn publish_node_event(&self, graph: &Graph, message: &Message, node_id: &str, event: &str) {
        let Some(buses) = &graph.event_buses else { return };
        buses
            .lifecycle
            .publish(LifecycleEvent {
                topic: node_topic(&graph.id, node_id, event),
                event: event.to_string(),
                node_id: Some(node_id.to_string()),
                message: message.clone(),
                timestamp: chrono::Utc::now(),
            })
            .await;
    }

    async fn publish_hitl_event(&self, graph: &Graph, message: &Message, node_id: &str) {
        let Some(buses) = &graph.event_buses else { return };
        buses
            .lifecycle
            .publish(LifecycleEvent {
                topic: hitl_topic(&graph.id, node_id),
                event: "requested".to_string(),
                node_id: Some(node_id.to_string()),
                message: message.clone(),
                timestamp: chrono::Utc::now(),
            })
            .await;
    }

    async fn publish_tool_call_events(&self, graph: &Graph, message: &Message, node_id: &str) {
        let Some(buses) = &graph.event_buses else { return };
        for tool_call in &message.tool_calls {
            buses
                .tool_calls
                .publish(ToolCallEmitted {
                    tool_call: tool_call.clone(),
                    message: message.clone(),
                    emitted_by: node_id.to_string(),
                    graph_id: message.graph_id.clone(),
                    run_id: message.run_id.clone(),
                    metadata: std::collections::HashMap::new(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::in_memory::InMemoryIdempotencyStore;
    use crate::graph::events::EventBuses;
    use crate::graph::node::{AgentCapability, AgentNode, OutputNode};
    use crate::graph::{Edge, GraphBuilder};
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoAgent;

    #[async_trait::async_trait]
    impl AgentCapability for EchoAgent {
        async fn invoke(&self, message: &Message) -> GraphResult<Message> {
            Ok(message.with_content(message.content.to_uppercase()))
        }
    }

    fn linear_graph() -> Graph {
        GraphBuilder::new("linear")
            .entry_point("a")
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "a".into(), agent: Arc::new(EchoAgent) })))
            .add_node(GraphNode::Output(Arc::new(OutputNode {
                id: "out".into(),
                selector: Arc::new(|m: &Message| Value::String(m.content.clone())),
            })))
            .add_edge(Edge::new("a", "out", 0))
            .with_event_buses(EventBuses::in_memory())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn linear_happy_path_completes_with_output() {
        let graph = linear_graph();
        let runner = GraphRunner::new();
        let msg = Message::new("hi", "user");
        let result = runner.execute(&graph, msg).await.unwrap();
        assert_eq!(result.state, ExecutionState::Completed);
        assert_eq!(result.content, "HI");
        assert_eq!(result.metadata.get("isOutput"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn execute_rejects_terminal_input() {
        let graph = linear_graph();
        let runner = GraphRunner::new();
        let msg = Message::new("hi", "user")
            .transition(ExecutionState::Running, None, None)
            .unwrap()
            .transition(ExecutionState::Completed, None, None)
            .unwrap();
        assert!(runner.execute(&graph, msg).await.is_err());
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
            message.transition(ExecutionState::Waiting, Some("awaiting human input"), Some(&self.id))
        }
    }

    #[tokio::test]
    async fn waiting_node_pauses_then_resumes_to_completion() {
        let graph = GraphBuilder::new("hitl")
            .entry_point("ask")
            .add_node(GraphNode::Custom(Arc::new(PauseNode { id: "ask".into() })))
            .add_node(GraphNode::Output(Arc::new(OutputNode {
                id: "out".into(),
                selector: Arc::new(|m: &Message| m.data.get("answer").cloned().unwrap_or(Value::Null)),
            })))
            .add_edge(Edge::new("ask", "out", 0))
            .build()
            .unwrap();
        let runner = GraphRunner::new();
        let msg = Message::new("hi", "user");
        let paused = runner.execute(&graph, msg).await.unwrap();
        assert_eq!(paused.state, ExecutionState::Waiting);

        let with_answer = paused.with_data("answer", Value::String("42".into()));
        let completed = runner.resume(&graph, with_answer).await.unwrap();
        assert_eq!(completed.state, ExecutionState::Completed);
        assert_eq!(completed.content, "42");
    }

    #[tokio::test]
    async fn idempotent_replay_hits_cache_without_rerunning_agent() {
        let calls = Arc::new(AtomicU32::new(0));
        struct CountingAgent(Arc<AtomicU32>);
        #[async_trait::async_trait]
        impl AgentCapability for CountingAgent {
            async fn invoke(&self, message: &Message) -> GraphResult<Message> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(message.with_content("done"))
            }
        }
        let store = Arc::new(InMemoryIdempotencyStore::new(100));
        let graph = GraphBuilder::new("idem")
            .entry_point("a")
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "a".into(), agent: Arc::new(CountingAgent(calls.clone())) })))
            .add_node(GraphNode::Output(Arc::new(OutputNode {
                id: "out".into(),
                selector: Arc::new(|m: &Message| Value::String(m.content.clone())),
            })))
            .add_edge(Edge::new("a", "out", 0))
            .with_idempotency_store(store)
            .build()
            .unwrap();
        let runner = GraphRunner::new();
        runner.execute(&graph, Message::new("hi", "user").with_metadata("intent", Value::String("fixed".into()))).await.unwrap();
        runner.execute(&graph, Message::new("hi", "user").with_metadata("intent", Value::String("fixed".into()))).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
