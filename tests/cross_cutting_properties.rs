//! Properties that should hold across every graph, not just the worked
//! examples: terminal closure, retry's recoverable-error filter, lifecycle
//! event ordering, nested subgraph pause/resume, and custom parallel merges.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use graphcore::graph::node::{AgentCapability, AgentNode, Aggregator, Branch, MergeNode, MergePolicy, Node, OutputNode, ParallelNode, SubgraphNode};
use graphcore::graph::subgraph;
use graphcore::graph::tool::{StaticResolver, Tool, ToolContext, ToolResult};
use graphcore::{Edge, EventBuses, ExecutionState, Graph, GraphBuilder, GraphError, GraphNode, GraphRunner, Message, RetryPolicy};

fn output_node(id: &str, selector: impl Fn(&Message) -> Value + Send + Sync + 'static) -> GraphNode {
    GraphNode::Output(Arc::new(OutputNode {
        id: id.to_string(),
        selector: Arc::new(selector),
    }))
}

struct EchoAgent;

#[async_trait]
impl AgentCapability for EchoAgent {
    async fn invoke(&self, message: &Message) -> graphcore::GraphResult<Message> {
        Ok(message.clone())
    }
}

fn linear_graph_with_buses() -> (Graph, EventBuses) {
    let buses = EventBuses::in_memory();
    let graph = GraphBuilder::new("linear-events")
        .entry_point("upper")
        .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "upper".into(), agent: Arc::new(EchoAgent) })))
        .add_node(output_node("out", |m| Value::String(m.content.clone())))
        .add_edge(Edge::new("upper", "out", 0))
        .with_event_buses(buses.clone())
        .build()
        .unwrap();
    (graph, buses)
}

#[tokio::test]
async fn terminal_messages_reject_execute_and_resume() {
    let graph = GraphBuilder::new("terminal")
        .entry_point("a")
        .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "a".into(), agent: Arc::new(EchoAgent) })))
        .build()
        .unwrap();
    let runner = GraphRunner::new();

    let completed = Message::new("hi", "user")
        .transition(ExecutionState::Running, None, None)
        .unwrap()
        .transition(ExecutionState::Completed, None, None)
        .unwrap();
    assert!(runner.execute(&graph, completed.clone()).await.is_err());

    let cancelled = Message::new("hi", "user").transition(ExecutionState::Cancelled, None, None).unwrap();
    assert!(runner.resume(&graph, cancelled).await.is_err());
}

#[tokio::test]
async fn retry_never_retries_an_unrecoverable_error() {
    let calls = Arc::new(AtomicU32::new(0));
    struct CountingUnrecoverable(Arc<AtomicU32>);
    #[async_trait]
    impl Tool for CountingUnrecoverable {
        fn name(&self) -> &str {
            "bad_args"
        }
        fn description(&self) -> &str {
            "counts invocations then raises validation"
        }
        fn schema(&self) -> Value {
            Value::Null
        }
        fn can_execute(&self, _params: &Value) -> bool {
            true
        }
        async fn execute(&self, _params: Value, _ctx: ToolContext) -> graphcore::GraphResult<ToolResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(GraphError::validation("malformed params"))
        }
    }

    let tool = Arc::new(CountingUnrecoverable(calls.clone()));
    let resolver = Arc::new(StaticResolver::new(tool));
    let graph = GraphBuilder::new("unrecoverable")
        .entry_point("call")
        .add_node(GraphNode::Tool(Arc::new(graphcore::graph::node::ToolNode {
            id: "call".into(),
            resolver,
            params_key: None,
        })))
        .with_retry_policy(RetryPolicy::fixed(5, Duration::from_millis(1)))
        .build()
        .unwrap();

    let runner = GraphRunner::new();
    let result = runner.execute(&graph, Message::new("hi", "user")).await;

    assert!(matches!(result, Err(GraphError::Validation { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lifecycle_events_observe_graph_then_node_ordering() {
    let (graph, buses) = linear_graph_with_buses();
    let runner = GraphRunner::new();
    let result = runner.execute(&graph, Message::new("hi", "user")).await.unwrap();
    assert_eq!(result.state, ExecutionState::Completed);

    let history = buses.lifecycle.history("").await;
    let topics: Vec<&str> = history.iter().map(|e| e.topic.as_str()).collect();

    let graph_started = topics.iter().position(|t| *t == "graph.linear-events.started").unwrap();
    let graph_completed = topics.iter().position(|t| *t == "graph.linear-events.completed").unwrap();
    let upper_started = topics.iter().position(|t| *t == "node.linear-events.upper.started").unwrap();
    let upper_completed = topics.iter().position(|t| *t == "node.linear-events.upper.completed").unwrap();
    let out_started = topics.iter().position(|t| *t == "node.linear-events.out.started").unwrap();
    let out_completed = topics.iter().position(|t| *t == "node.linear-events.out.completed").unwrap();

    assert!(graph_started < upper_started);
    assert!(upper_started < upper_completed);
    assert!(upper_completed < out_started);
    assert!(out_started < out_completed);
    assert!(out_completed < graph_completed);
}

struct PauseNode {
    id: String,
}

#[async_trait]
impl Node for PauseNode {
    fn id(&self) -> &str {
        &self.id
    }
    async fn run(&self, message: &Message) -> graphcore::GraphResult<Message> {
        message.transition(ExecutionState::Waiting, Some("awaiting human input"), Some(&self.id))
    }
}

fn innermost_hitl_graph() -> Arc<Graph> {
    Arc::new(
        GraphBuilder::new("inner")
            .entry_point("h")
            .add_node(GraphNode::Custom(Arc::new(PauseNode { id: "h".into() })))
            .add_node(output_node("innerOut", |m| m.data.get("user_answer").cloned().unwrap_or(Value::Null)))
            .add_edge(Edge::new("h", "innerOut", 0))
            .build()
            .unwrap(),
    )
}

fn middle_subgraph_graph() -> Arc<Graph> {
    let mut mapping = HashMap::new();
    mapping.insert("mid_answer".to_string(), "user_answer".to_string());
    Arc::new(
        GraphBuilder::new("middle")
            .entry_point("s2")
            .add_node(GraphNode::Subgraph(Arc::new(SubgraphNode {
                id: "s2".into(),
                child_graph: innermost_hitl_graph(),
                output_mapping: mapping,
            })))
            .add_node(output_node("middleOut", |m| m.data.get("mid_answer").cloned().unwrap_or(Value::Null)))
            .add_edge(Edge::new("s2", "middleOut", 0))
            .build()
            .unwrap(),
    )
}

/// Two levels of subgraph nesting: a pause at the innermost graph must
/// bubble through both intermediate `SubgraphNode`s as a single stacked
/// WAITING message, and a single `resume` call must unwind both levels back
/// into a COMPLETED outer run.
#[tokio::test]
async fn depth_two_nested_subgraph_hitl_round_trips() {
    let mut outer_mapping = HashMap::new();
    outer_mapping.insert("answer".to_string(), "mid_answer".to_string());

    let outer_graph = GraphBuilder::new("outer")
        .entry_point("s1")
        .add_node(GraphNode::Subgraph(Arc::new(SubgraphNode {
            id: "s1".into(),
            child_graph: middle_subgraph_graph(),
            output_mapping: outer_mapping,
        })))
        .add_node(output_node("out", |m| m.data.get("answer").cloned().unwrap_or(Value::Null)))
        .add_edge(Edge::new("s1", "out", 0))
        .build()
        .unwrap();

    let runner = GraphRunner::new();
    let paused = runner.execute(&outer_graph, Message::new("hi", "user")).await.unwrap();
    assert_eq!(paused.state, ExecutionState::Waiting);

    let stack = subgraph::read_stack(&paused);
    assert_eq!(stack.len(), 2);
    assert_eq!(stack[0].parent_node_id, "s1");
    assert_eq!(stack[0].depth, 2);
    assert_eq!(stack[1].parent_node_id, "s2");
    assert_eq!(stack[1].depth, 1);

    let with_answer = paused.with_data("user_answer", Value::String("yes".into()));
    let completed = runner.resume(&outer_graph, with_answer).await.unwrap();

    assert_eq!(completed.state, ExecutionState::Completed);
    assert_eq!(completed.data.get("answer"), Some(&Value::String("yes".into())));
    assert_eq!(completed.content, "yes");
}

struct ScoreNode {
    id: String,
    score: f64,
}

#[async_trait]
impl Node for ScoreNode {
    fn id(&self) -> &str {
        &self.id
    }
    async fn run(&self, message: &Message) -> graphcore::GraphResult<Message> {
        Ok(message.with_metadata("score", serde_json::json!(self.score)).with_content(self.score.to_string()))
    }
}

#[tokio::test]
async fn parallel_merge_custom_policy_sums_a_numeric_key() {
    let mut aggregators = HashMap::new();
    aggregators.insert("score".to_string(), Aggregator::Sum);
    let parallel = ParallelNode {
        id: "p".into(),
        parallel_id: "round".into(),
        branches: vec![
            Branch { branch_id: "b1".into(), node: Arc::new(ScoreNode { id: "b1".into(), score: 1.0 }) },
            Branch { branch_id: "b2".into(), node: Arc::new(ScoreNode { id: "b2".into(), score: 2.0 }) },
            Branch { branch_id: "b3".into(), node: Arc::new(ScoreNode { id: "b3".into(), score: 4.0 }) },
        ],
        merge_policy: MergePolicy::Custom(aggregators),
        fail_fast: false,
    };
    let out = parallel.run(&Message::new("start", "user")).await.unwrap();
    assert_eq!(out.metadata.get("score"), Some(&serde_json::json!(7.0)));
}

#[tokio::test]
async fn parallel_merge_namespace_policy_scopes_metadata_per_branch() {
    let parallel = ParallelNode {
        id: "p".into(),
        parallel_id: "round".into(),
        branches: vec![
            Branch { branch_id: "b1".into(), node: Arc::new(ScoreNode { id: "b1".into(), score: 1.0 }) },
            Branch { branch_id: "b2".into(), node: Arc::new(ScoreNode { id: "b2".into(), score: 2.0 }) },
        ],
        merge_policy: MergePolicy::Namespace,
        fail_fast: false,
    };
    let out = parallel.run(&Message::new("start", "user")).await.unwrap();
    assert!(out.metadata.contains_key("round.b1"));
    assert!(out.metadata.contains_key("round.b2"));
    assert!(!out.metadata.contains_key("score"));
}

/// Replaying the same `(graph, message)` twice with idempotency enabled must
/// return literally the same final message the first run produced, not a
/// second, freshly-stamped run that merely has equal content.
#[tokio::test]
async fn idempotent_replay_returns_the_identical_final_message() {
    let calls = Arc::new(AtomicU32::new(0));
    struct CountingAgent(Arc<AtomicU32>);
    #[async_trait]
    impl AgentCapability for CountingAgent {
        async fn invoke(&self, message: &Message) -> graphcore::GraphResult<Message> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(message.with_content("done"))
        }
    }
    let store = Arc::new(graphcore::InMemoryIdempotencyStore::new(100));
    let graph = GraphBuilder::new("idem")
        .entry_point("a")
        .add_node(GraphNode::Agent(Arc::new(AgentNode { id: "a".into(), agent: Arc::new(CountingAgent(calls.clone())) })))
        .add_node(output_node("out", |m| Value::String(m.content.clone())))
        .add_edge(Edge::new("a", "out", 0))
        .with_idempotency_store(store)
        .build()
        .unwrap();

    let runner = GraphRunner::new();
    let make_msg = || Message::new("hi", "user").with_metadata("intent", Value::String("fixed".into()));
    let first = runner.execute(&graph, make_msg()).await.unwrap();
    let second = runner.execute(&graph, make_msg()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.id, second.id);
    assert_eq!(first.run_id, second.run_id);
}
