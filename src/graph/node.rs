//! Node variants.
//!
//! A closed set of variants modelled as tagged records (`GraphNode`) rather
//! than a virtual hierarchy. The runner inspects the tag for the two special
//! dispatch paths (`ToolNode` resolution, `SubgraphNode` recursion with
//! runner injection) and falls through to the generic [`Node::run`] for
//! everything else — one `run(state) -> Result<state>` shape, generalized
//! from arbitrary state to the fixed [`Message`] envelope this core
//! operates on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{GraphError, GraphResult};
use crate::message::{ExecutionState, Message, ToolCallRecord};

use super::listeners::{invoke_tool_with_listeners, ToolLifecycleListener};
use super::tool::{ToolContext, ToolResolver};
use super::Graph;

/// The per-variant contract every node satisfies (§4.4): "a node must return
/// either a success message whose state is RUNNING/WAITING/terminal, or a
/// failure; nodes must not mutate the input." Taking `&Message` makes the
/// no-mutation rule a property of the type signature.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> &str;
    async fn run(&self, message: &Message) -> GraphResult<Message>;
}

/// The capability an [`AgentNode`] delegates to: receives the current
/// message, returns a reply message whose `content`/`data` get copied back
/// onto the envelope (§4.4).
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn invoke(&self, message: &Message) -> GraphResult<Message>;
}

/// Reserved metadata/identity fields the runner owns; an `AgentNode` must
/// preserve these on the envelope even though it replaces `content`/`data`.
fn apply_agent_reply(original: &Message, reply: &Message) -> Message {
    let mut next = original.clone();
    next.content = reply.content.clone();
    for (k, v) in &reply.data {
        next.data.insert(k.clone(), v.clone());
    }
    for (k, v) in &reply.metadata {
        next.metadata.entry(k.clone()).or_insert_with(|| v.clone());
    }
    next
}

pub struct AgentNode {
    pub id: String,
    pub agent: Arc<dyn AgentCapability>,
}

#[async_trait]
impl Node for AgentNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, message: &Message) -> GraphResult<Message> {
        let reply = self.agent.invoke(message).await?;
        Ok(apply_agent_reply(message, &reply))
    }
}

/// Resolves a tool via its [`ToolResolver`], reads params from `data`,
/// invokes it, appends a tool-call record, and writes `tool_result` plus any
/// result metadata into `data` (§4.4). "Never executed directly by the
/// runner" in the sense that the runner's dispatch path calls
/// [`invoke_tool_with_listeners`] directly with retry/listener threading;
/// this `run` is the plain fallback used when a `ToolNode` is invoked
/// outside the runner (e.g. nested directly inside another node's logic).
pub struct ToolNode {
    pub id: String,
    pub resolver: Arc<dyn ToolResolver>,
    /// When set, only this key from `data` is passed as params; otherwise
    /// the whole `data` map is passed as a JSON object.
    pub params_key: Option<String>,
}

impl ToolNode {
    pub fn params_from(&self, message: &Message) -> Value {
        match &self.params_key {
            Some(key) => message.data.get(key).cloned().unwrap_or(Value::Null),
            None => Value::Object(message.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        }
    }

    /// Writes a tool's outcome onto a message: the tool-call record plus
    /// `data["tool_result"]` and any `result.metadata` entries (§4.13).
    pub fn apply_result(message: &Message, record: ToolCallRecord, result_value: Option<Value>, result_metadata: &HashMap<String, Value>) -> Message {
        let mut next = message.with_tool_call(record);
        if let Some(value) = result_value {
            next = next.with_data("tool_result", value);
        }
        for (k, v) in result_metadata {
            next = next.with_data(k.clone(), v.clone());
        }
        next
    }
}

#[async_trait]
impl Node for ToolNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, message: &Message) -> GraphResult<Message> {
        let tool = self.resolver.resolve(message).await?;
        let params = self.params_from(message);
        let ctx = ToolContext {
            run_id: message.run_id.clone(),
            graph_id: message.graph_id.clone(),
            node_id: message.node_id.clone(),
            attempt: 1,
        };
        let start = std::time::Instant::now();
        let listeners: Vec<Arc<dyn ToolLifecycleListener>> = Vec::new();
        let outcome = invoke_tool_with_listeners(tool.clone(), params.clone(), ctx, 1, &listeners).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                let record = ToolCallRecord {
                    name: tool.name().to_string(),
                    arguments: params,
                    result: result.value.clone(),
                    ok: result.ok,
                    duration_ms,
                    attempt: 1,
                    error: result.error.clone(),
                };
                Ok(Self::apply_result(message, record, result.value.clone(), &result.metadata))
            }
            Err(err) => {
                let record = ToolCallRecord {
                    name: tool.name().to_string(),
                    arguments: params,
                    result: None,
                    ok: false,
                    duration_ms,
                    attempt: 1,
                    error: Some(err.to_string()),
                };
                let _ = record; // the runner's onError path appends the authoritative error-report record
                Err(err)
            }
        }
    }
}

/// Owns a child [`Graph`]; forwards the input into it and maps the child's
/// `data` back into the parent under `outputMapping: parentKey -> childKey`
/// (§4.4). This plain `run` executes the child with a *fresh* runner that
/// inherits none of the parent's retry/middleware/listeners — the runner's
/// special-cased dispatch path (`GraphRunner::dispatch_subgraph`) is what
/// threads the *same* runner instance through, per §9's note on the
/// `SubgraphNode`/runner cyclic dependency.
pub struct SubgraphNode {
    pub id: String,
    pub child_graph: Arc<Graph>,
    pub output_mapping: HashMap<String, String>,
}

#[async_trait]
impl Node for SubgraphNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, message: &Message) -> GraphResult<Message> {
        let runner = super::runner::GraphRunner::new();
        let child_input = message.enter_subgraph();
        let child_result = runner.execute(&self.child_graph, child_input).await?;
        if child_result.state == ExecutionState::Waiting {
            // No parent runner available to attach a checkpoint frame in
            // this plain fallback path; surface the pause as-is.
            return Ok(child_result);
        }
        let mut next = message.clone();
        for (parent_key, child_key) in &self.output_mapping {
            if let Some(v) = child_result.data.get(child_key) {
                next.data.insert(parent_key.clone(), v.clone());
            }
        }
        Ok(next)
    }
}

/// Applies a `selector(message) -> value`, transitions to COMPLETED, writes
/// the chosen value into `content`, and marks `metadata["isOutput"] = true`
/// (§4.4).
pub struct OutputNode {
    pub id: String,
    pub selector: Arc<dyn Fn(&Message) -> Value + Send + Sync>,
}

#[async_trait]
impl Node for OutputNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, message: &Message) -> GraphResult<Message> {
        let value = (self.selector)(message);
        let content = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let completed = message.transition(ExecutionState::Completed, Some("output selected"), Some(&self.id))?;
        let completed = completed.with_content(content).with_metadata("isOutput", Value::Bool(true));
        Ok(completed)
    }
}

/// How [`ParallelNode`] reconciles branch metadata onto the returned message
/// (§4.4).
#[derive(Clone)]
pub enum MergePolicy {
    /// Each branch's metadata lands under its own `{parallelId}.{branchId}` key.
    Namespace,
    /// Branch metadata is flattened; later branches (by declared order) win on key conflicts.
    LastWrite,
    /// Branch metadata is flattened; earlier branches (by declared order) win on key conflicts.
    FirstWrite,
    /// Per metadata key, apply the named [`Aggregator`]; keys without one fall back to last-write.
    Custom(HashMap<String, Aggregator>),
}

/// Aggregation functions available to `Custom` merge policies and to
/// [`MergeNode`] (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregator {
    Average,
    Sum,
    Vote,
    Min,
    Max,
    First,
    Last,
    ConcatList,
}

impl Aggregator {
    fn apply(self, values: &[Value]) -> Value {
        match self {
            Aggregator::First => values.first().cloned().unwrap_or(Value::Null),
            Aggregator::Last => values.last().cloned().unwrap_or(Value::Null),
            Aggregator::ConcatList => Value::Array(values.to_vec()),
            Aggregator::Vote => vote(values),
            Aggregator::Average | Aggregator::Sum | Aggregator::Min | Aggregator::Max => {
                let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
                if nums.is_empty() {
                    return Value::Null;
                }
                let result = match self {
                    Aggregator::Sum => nums.iter().sum(),
                    Aggregator::Average => nums.iter().sum::<f64>() / nums.len() as f64,
                    Aggregator::Min => nums.iter().cloned().fold(f64::INFINITY, f64::min),
                    Aggregator::Max => nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                    _ => unreachable!(),
                };
                serde_json::json!(result)
            }
        }
    }
}

/// Strict majority, else the first tied value by branch-id declaration order (§4.4, §8).
fn vote(values: &[Value]) -> Value {
    let mut counts: Vec<(Value, usize)> = Vec::new();
    for v in values {
        if let Some(entry) = counts.iter_mut().find(|(existing, _)| existing == v) {
            entry.1 += 1;
        } else {
            counts.push((v.clone(), 1));
        }
    }
    let half = values.len() / 2;
    if let Some((v, c)) = counts.iter().find(|(_, c)| *c > half) {
        let _ = c;
        return v.clone();
    }
    let max_count = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
    counts
        .into_iter()
        .find(|(_, c)| *c == max_count)
        .map(|(v, _)| v)
        .unwrap_or(Value::Null)
}

/// One labelled child of a [`ParallelNode`].
pub struct Branch {
    pub branch_id: String,
    pub node: Arc<dyn Node>,
}

/// Runs a labelled set of child nodes concurrently; merges per-branch
/// metadata per `merge_policy`; stores per-branch output values under
/// `data[parallelId] = {branchId -> value}`; `fail_fast` controls whether
/// the first branch failure cancels the rest or failing branches are
/// skipped with partial results (§4.4, §5).
pub struct ParallelNode {
    pub id: String,
    pub parallel_id: String,
    pub branches: Vec<Branch>,
    pub merge_policy: MergePolicy,
    pub fail_fast: bool,
}

#[async_trait]
impl Node for ParallelNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, message: &Message) -> GraphResult<Message> {
        let mut handles = Vec::with_capacity(self.branches.len());
        for branch in &self.branches {
            let node = branch.node.clone();
            let branch_id = branch.branch_id.clone();
            let input = message.clone();
            handles.push(tokio::spawn(async move {
                let result = node.run(&input).await;
                (branch_id, result)
            }));
        }

        let mut results: Vec<(String, GraphResult<Message>)> = Vec::with_capacity(handles.len());
        if self.fail_fast {
            let mut remaining = handles;
            while !remaining.is_empty() {
                let (finished, _index, rest) = futures_select(remaining).await;
                let (branch_id, result) = finished;
                let failed = result.is_err();
                results.push((branch_id, result));
                remaining = rest;
                if failed {
                    for h in remaining {
                        h.abort();
                    }
                    break;
                }
            }
        } else {
            for h in handles {
                match h.await {
                    Ok((branch_id, result)) => results.push((branch_id, result)),
                    Err(join_err) => results.push((
                        "unknown".to_string(),
                        Err(GraphError::execution(format!("branch task panicked: {join_err}"))),
                    )),
                }
            }
        }

        if self.fail_fast {
            if let Some((_, Err(err))) = results.iter().find(|(_, r)| r.is_err()) {
                return Err(err.clone());
            }
        }

        let declared_order: Vec<&str> = self.branches.iter().map(|b| b.branch_id.as_str()).collect();
        let mut successes: Vec<(String, Message)> = results
            .into_iter()
            .filter_map(|(id, r)| r.ok().map(|m| (id, m)))
            .collect();
        successes.sort_by_key(|(id, _)| declared_order.iter().position(|d| *d == id).unwrap_or(usize::MAX));

        let mut next = message.clone();
        let branch_values: serde_json::Map<String, Value> = successes
            .iter()
            .map(|(id, m)| (id.clone(), Value::String(m.content.clone())))
            .collect();
        next = next.with_data(self.parallel_id.clone(), Value::Object(branch_values));

        match &self.merge_policy {
            MergePolicy::Namespace => {
                for (id, m) in &successes {
                    let namespaced = Value::Object(m.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
                    next = next.with_metadata(format!("{}.{}", self.parallel_id, id), namespaced);
                }
            }
            MergePolicy::FirstWrite => {
                for (_, m) in &successes {
                    for (k, v) in &m.metadata {
                        next.metadata.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
            MergePolicy::LastWrite => {
                for (_, m) in &successes {
                    for (k, v) in &m.metadata {
                        next.metadata.insert(k.clone(), v.clone());
                    }
                }
            }
            MergePolicy::Custom(aggregators) => {
                let mut by_key: HashMap<String, Vec<Value>> = HashMap::new();
                for (_, m) in &successes {
                    for (k, v) in &m.metadata {
                        by_key.entry(k.clone()).or_default().push(v.clone());
                    }
                }
                for (key, values) in by_key {
                    let merged = match aggregators.get(&key) {
                        Some(agg) => agg.apply(&values),
                        None => values.last().cloned().unwrap_or(Value::Null),
                    };
                    next = next.with_metadata(key, merged);
                }
            }
        }

        Ok(next)
    }
}

/// Consumes `data[parallelId]` and applies a merger — one of the built-in
/// [`Aggregator`]s or a user-provided closure — writing the merged value
/// into both `content` and `data["{parallelId}_merged"]` (§4.4, §8 scenario 6).
pub enum Merger {
    Builtin(Aggregator),
    Custom(Arc<dyn Fn(&HashMap<String, Value>) -> Value + Send + Sync>),
}

pub struct MergeNode {
    pub id: String,
    pub parallel_id: String,
    pub merger: Merger,
}

#[async_trait]
impl Node for MergeNode {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, message: &Message) -> GraphResult<Message> {
        let branch_values: HashMap<String, Value> = match message.data.get(&self.parallel_id) {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => {
                return Err(GraphError::execution(format!(
                    "MergeNode '{}': no parallel results found under data['{}']",
                    self.id, self.parallel_id
                )))
            }
        };
        let values: Vec<Value> = branch_values.values().cloned().collect();
        let merged = match &self.merger {
            Merger::Builtin(agg) => agg.apply(&values),
            Merger::Custom(f) => f(&branch_values),
        };
        let content = match &merged {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(message
            .with_content(content)
            .with_data(format!("{}_merged", self.parallel_id), merged))
    }
}

/// A closed set of node variants modelled as a tagged record (§9), stored by
/// [`Graph`] keyed by node id. The runner matches on this enum directly to
/// special-case `Tool`/`Subgraph` dispatch; everything else goes through the
/// generic [`Node::run`] via [`GraphNode::run_plain`].
#[derive(Clone)]
pub enum GraphNode {
    Agent(Arc<AgentNode>),
    Tool(Arc<ToolNode>),
    Subgraph(Arc<SubgraphNode>),
    Output(Arc<OutputNode>),
    Parallel(Arc<ParallelNode>),
    Merge(Arc<MergeNode>),
    Custom(Arc<dyn Node>),
}

impl GraphNode {
    pub fn id(&self) -> &str {
        match self {
            GraphNode::Agent(n) => n.id(),
            GraphNode::Tool(n) => n.id(),
            GraphNode::Subgraph(n) => n.id(),
            GraphNode::Output(n) => n.id(),
            GraphNode::Parallel(n) => n.id(),
            GraphNode::Merge(n) => n.id(),
            GraphNode::Custom(n) => n.id(),
        }
    }

    /// Runs the node through its plain `Node::run` impl, with no retry,
    /// middleware, or lifecycle-listener threading. The runner's dispatch
    /// path calls this for every variant except `Tool` and `Subgraph`, which
    /// it special-cases instead (§4.12 step 6).
    pub async fn run_plain(&self, message: &Message) -> GraphResult<Message> {
        match self {
            GraphNode::Agent(n) => n.run(message).await,
            GraphNode::Tool(n) => n.run(message).await,
            GraphNode::Subgraph(n) => n.run(message).await,
            GraphNode::Output(n) => n.run(message).await,
            GraphNode::Parallel(n) => n.run(message).await,
            GraphNode::Merge(n) => n.run(message).await,
            GraphNode::Custom(n) => n.run(message).await,
        }
    }
}

/// Races a set of spawned join handles, returning the first to finish along
/// with the remaining, still-pending handles. Minimal `select_all` substitute
/// since this crate doesn't depend on `futures` directly.
async fn futures_select<T: Send + 'static>(
    mut handles: Vec<tokio::task::JoinHandle<T>>,
) -> (T, usize, Vec<tokio::task::JoinHandle<T>>) {
    use std::future::{poll_fn, Future};
    use std::task::Poll;

    let (index, result) = poll_fn(|cx| {
        for (i, h) in handles.iter_mut().enumerate() {
            if let Poll::Ready(res) = std::pin::Pin::new(h).poll(cx) {
                return Poll::Ready((i, res));
            }
        }
        Poll::Pending
    })
    .await;
    let value = result.unwrap_or_else(|_| panic!("branch task panicked"));
    handles.remove(index);
    (value, index, handles)
}
