//! Graph model, builder, and validator (§3, §4.3).

pub mod events;
#[cfg(feature = "kafka-backend")]
pub mod events_kafka;
#[cfg(feature = "redis-backend")]
pub mod events_redis;
pub mod listeners;
pub mod logging;
pub mod middleware;
pub mod node;
pub mod retry;
pub mod runner;
pub mod subgraph;
pub mod tool;

pub use node::Node;
pub use runner::GraphRunner;

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{CachePolicy, IdempotencyStore, VectorCache};
use crate::error::{GraphError, GraphResult};
use crate::message::Message;
use events::EventBuses;
use listeners::ToolLifecycleListener;
use middleware::Middleware;
use node::GraphNode;
use retry::RetryPolicy;

/// Wildcard `from` endpoint matching any node id (§3).
pub const WILDCARD_FROM: &str = "*";

/// A directed transition from one node to another (§3).
pub struct Edge {
    pub from: String,
    pub to: String,
    pub priority: i32,
    pub is_fallback: bool,
    pub condition: Arc<dyn Fn(&Message) -> bool + Send + Sync>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, priority: i32) -> Self {
        Edge {
            from: from.into(),
            to: to.into(),
            priority,
            is_fallback: false,
            condition: Arc::new(|_| true),
        }
    }

    pub fn fallback(from: impl Into<String>, to: impl Into<String>, priority: i32) -> Self {
        Edge {
            from: from.into(),
            to: to.into(),
            priority,
            is_fallback: true,
            condition: Arc::new(|_| true),
        }
    }

    pub fn with_condition(mut self, condition: Arc<dyn Fn(&Message) -> bool + Send + Sync>) -> Self {
        self.condition = condition;
        self
    }
}

/// Immutable graph description (§3). Freely shared across concurrent runs.
pub struct Graph {
    pub id: String,
    pub entry_point: String,
    pub nodes: HashMap<String, GraphNode>,
    pub edges: Vec<Edge>,
    pub allow_cycles: bool,

    pub idempotency_store: Option<Arc<dyn IdempotencyStore>>,
    pub vector_cache: Option<Arc<dyn VectorCache>>,
    pub cache_policy: CachePolicy,
    pub event_buses: Option<EventBuses>,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub retry_policy: Option<RetryPolicy>,
    pub retry_enabled: Option<bool>,
    pub tool_lifecycle_listeners: Vec<Arc<dyn ToolLifecycleListener>>,
}

impl Graph {
    /// Edges where `from == node_id` or `from == "*"` (§4.12 edge selection).
    pub fn edges_from(&self, node_id: &str) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.from == node_id || e.from == WILDCARD_FROM)
            .collect()
    }

    /// Whether retry is enabled for this graph: explicit `retry_enabled`, or
    /// unset with a policy present, or... the runner default otherwise
    /// applies (§4.8).
    pub fn retry_is_enabled(&self) -> bool {
        match self.retry_enabled {
            Some(v) => v,
            None => self.retry_policy.is_some(),
        }
    }
}

/// Builds a [`Graph`]: registers nodes keyed by id, appends edges, sets
/// optional collaborators, and validates tool resolvers at build time
/// (§4.5, §6: "throws on ERROR-level entries when registry is non-empty").
pub struct GraphBuilder {
    id: String,
    entry_point: Option<String>,
    nodes: HashMap<String, GraphNode>,
    edges: Vec<Edge>,
    allow_cycles: bool,
    idempotency_store: Option<Arc<dyn IdempotencyStore>>,
    vector_cache: Option<Arc<dyn VectorCache>>,
    cache_policy: CachePolicy,
    event_buses: Option<EventBuses>,
    middleware: Vec<Arc<dyn Middleware>>,
    retry_policy: Option<RetryPolicy>,
    retry_enabled: Option<bool>,
    tool_lifecycle_listeners: Vec<Arc<dyn ToolLifecycleListener>>,
    tool_resolvers_to_validate: Vec<Arc<dyn tool::ToolResolver>>,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        GraphBuilder {
            id: id.into(),
            entry_point: None,
            nodes: HashMap::new(),
            edges: Vec::new(),
            allow_cycles: false,
            idempotency_store: None,
            vector_cache: None,
            cache_policy: CachePolicy::default(),
            event_buses: None,
            middleware: Vec::new(),
            retry_policy: None,
            retry_enabled: None,
            tool_lifecycle_listeners: Vec::new(),
            tool_resolvers_to_validate: Vec::new(),
        }
    }

    pub fn entry_point(mut self, node_id: impl Into<String>) -> Self {
        self.entry_point = Some(node_id.into());
        self
    }

    pub fn allow_cycles(mut self, allow: bool) -> Self {
        self.allow_cycles = allow;
        self
    }

    pub fn add_node(mut self, node: GraphNode) -> Self {
        if let GraphNode::Tool(tool_node) = &node {
            self.tool_resolvers_to_validate.push(tool_node.resolver.clone());
        }
        self.nodes.insert(node.id().to_string(), node);
        self
    }

    pub fn add_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency_store = Some(store);
        self
    }

    pub fn with_vector_cache(mut self, cache: Arc<dyn VectorCache>) -> Self {
        self.vector_cache = Some(cache);
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_event_buses(mut self, buses: EventBuses) -> Self {
        self.event_buses = Some(buses);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_retry_enabled(mut self, enabled: bool) -> Self {
        self.retry_enabled = Some(enabled);
        self
    }

    pub fn with_tool_lifecycle_listener(mut self, listener: Arc<dyn ToolLifecycleListener>) -> Self {
        self.tool_lifecycle_listeners.push(listener);
        self
    }

    /// Builds the graph, running `validate_graph` and tool-resolver
    /// validation (§4.3, §4.5, §6).
    pub fn build(self) -> GraphResult<Graph> {
        let entry_point = self
            .entry_point
            .ok_or_else(|| GraphError::validation("graph has no entry point"))?;

        let graph = Graph {
            id: self.id,
            entry_point,
            nodes: self.nodes,
            edges: self.edges,
            allow_cycles: self.allow_cycles,
            idempotency_store: self.idempotency_store,
            vector_cache: self.vector_cache,
            cache_policy: self.cache_policy,
            event_buses: self.event_buses,
            middleware: self.middleware,
            retry_policy: self.retry_policy,
            retry_enabled: self.retry_enabled,
            tool_lifecycle_listeners: self.tool_lifecycle_listeners,
        };

        validate_graph(&graph)?;

        for resolver in &self.tool_resolvers_to_validate {
            for finding in resolver.validate() {
                if finding.level == tool::ValidationLevel::Error {
                    return Err(GraphError::validation(format!(
                        "tool resolver '{}': {}",
                        resolver.display_name(),
                        finding.message
                    )));
                }
                tracing::warn!(resolver = %resolver.display_name(), message = %finding.message, "tool resolver validation warning");
            }
        }

        Ok(graph)
    }
}

/// Graph structural validation (§4.3): entry point present, every edge
/// endpoint (except wildcard `from`) resolves to a node, and (when cycles
/// are disallowed) the edge-induced digraph from the entry point is acyclic.
pub fn validate_graph(graph: &Graph) -> GraphResult<()> {
    if !graph.nodes.contains_key(&graph.entry_point) {
        return Err(GraphError::validation("entry point not found among nodes")
            .with_context("entry_point", graph.entry_point.clone()));
    }

    for edge in &graph.edges {
        if edge.from != WILDCARD_FROM && !graph.nodes.contains_key(&edge.from) {
            return Err(GraphError::validation("edge 'from' not found among nodes")
                .with_context("from", edge.from.clone()));
        }
        if !graph.nodes.contains_key(&edge.to) {
            return Err(GraphError::validation("edge 'to' not found among nodes")
                .with_context("to", edge.to.clone()));
        }
    }

    if !graph.allow_cycles {
        detect_cycle(graph)?;
    }

    Ok(())
}

fn detect_cycle(graph: &Graph) -> GraphResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        graph: &'a Graph,
        node_id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> GraphResult<()> {
        match marks.get(node_id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(GraphError::validation("cycle detected").with_context("node_id", node_id.to_string()))
            }
            None => {}
        }
        marks.insert(node_id, Mark::Visiting);
        for edge in graph.edges.iter().filter(|e| e.from == node_id) {
            visit(graph, edge.to.as_str(), marks)?;
        }
        marks.insert(node_id, Mark::Done);
        Ok(())
    }

    visit(graph, graph.entry_point.as_str(), &mut marks)
}

/// Edge selection (§4.12): from the current node, collect regular and
/// fallback edges, sort each by ascending priority, return the first
/// regular edge whose condition is true, else the first fallback, else
/// `None`.
pub fn select_next_edge<'a>(graph: &'a Graph, current_node_id: &str, message: &Message) -> Option<&'a Edge> {
    let mut candidates = graph.edges_from(current_node_id);
    candidates.sort_by_key(|e| e.priority);
    let (fallbacks, regulars): (Vec<&Edge>, Vec<&Edge>) = candidates.into_iter().partition(|e| e.is_fallback);
    if let Some(edge) = regulars.into_iter().find(|e| (e.condition)(message)) {
        return Some(edge);
    }
    fallbacks.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use node::{AgentNode, OutputNode};
    use std::sync::Arc;

    struct EchoAgent;

    #[async_trait::async_trait]
    impl node::AgentCapability for EchoAgent {
        async fn invoke(&self, message: &Message) -> GraphResult<Message> {
            Ok(message.with_content("x"))
        }
    }

    fn simple_graph() -> Graph {
        GraphBuilder::new("g1")
            .entry_point("A")
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "A".into(), agent: Arc::new(EchoAgent) })))
            .add_node(GraphNode::Output(Arc::new(OutputNode {
                id: "out".into(),
                selector: Arc::new(|m: &Message| serde_json::Value::String(m.content.clone())),
            })))
            .add_edge(Edge::new("A", "out", 0))
            .build()
            .unwrap()
    }

    #[test]
    fn validate_rejects_missing_entry_point() {
        let graph = GraphBuilder::new("g").entry_point("missing").build();
        assert!(graph.is_err());
    }

    #[test]
    fn validate_rejects_cycles_when_disallowed() {
        let result = GraphBuilder::new("g")
            .entry_point("A")
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "A".into(), agent: Arc::new(EchoAgent) })))
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "B".into(), agent: Arc::new(EchoAgent) })))
            .add_edge(Edge::new("A", "B", 0))
            .add_edge(Edge::new("B", "A", 0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn allow_cycles_permits_a_cycle() {
        let result = GraphBuilder::new("g")
            .entry_point("A")
            .allow_cycles(true)
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "A".into(), agent: Arc::new(EchoAgent) })))
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "B".into(), agent: Arc::new(EchoAgent) })))
            .add_edge(Edge::new("A", "B", 0))
            .add_edge(Edge::new("B", "A", 0))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn edge_selection_picks_lowest_priority_matching_condition() {
        let msg = Message::new("hi", "u").with_data("t", serde_json::Value::String("c".into()));
        let graph = GraphBuilder::new("g")
            .entry_point("classifier")
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "classifier".into(), agent: Arc::new(EchoAgent) })))
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "a".into(), agent: Arc::new(EchoAgent) })))
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "b".into(), agent: Arc::new(EchoAgent) })))
            .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "default".into(), agent: Arc::new(EchoAgent) })))
            .add_edge(Edge::new("classifier", "a", 0).with_condition(Arc::new(|m| m.data.get("t").and_then(|v| v.as_str()) == Some("a"))))
            .add_edge(Edge::new("classifier", "b", 1).with_condition(Arc::new(|m| m.data.get("t").and_then(|v| v.as_str()) == Some("b"))))
            .add_edge(Edge::fallback("classifier", "default", 0))
            .build()
            .unwrap();
        let edge = select_next_edge(&graph, "classifier", &msg).unwrap();
        assert_eq!(edge.to, "default");

        let msg_a = Message::new("hi", "u").with_data("t", serde_json::Value::String("a".into()));
        let edge_a = select_next_edge(&graph, "classifier", &msg_a).unwrap();
        assert_eq!(edge_a.to, "a");
    }

    #[test]
    fn linear_graph_builds_ok() {
        let graph = simple_graph();
        assert_eq!(graph.entry_point, "A");
    }
}
