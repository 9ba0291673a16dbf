//! Tool interface and resolution.
//!
//! One async `execute` method, `Send + Sync`, object-safe via `async_trait` —
//! the same shape as this crate's node traits, specialized to the
//! `Tool`/`ToolResolver` contracts rather than a state-in-state-out agent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{GraphError, GraphResult};
use crate::message::Message;

/// The outcome of one tool invocation (§6): distinct from `GraphResult` so a
/// tool can report a business-level failure (`ok: false`) without raising a
/// Rust error — only raises become `GraphError::Tool`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub ok: bool,
    pub value: Option<Value>,
    pub error: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl ToolResult {
    pub fn success(value: Value) -> Self {
        ToolResult {
            ok: true,
            value: Some(value),
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            ok: false,
            value: None,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A tool: `{name, description, schema, execute, canExecute}` (§6).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// A declarative parameter schema, validated against `params` at
    /// `can_execute` time (§4.5: "schemas validated at `canExecute` time").
    fn schema(&self) -> Value;

    fn can_execute(&self, params: &Value) -> bool;

    async fn execute(&self, params: Value, context: ToolContext) -> GraphResult<ToolResult>;
}

/// Ambient context handed to a tool alongside its params: run/graph/node
/// identity plus the attempt counter the retry supervisor maintains (§4.8).
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub run_id: Option<String>,
    pub graph_id: Option<String>,
    pub node_id: Option<String>,
    pub attempt: u32,
}

/// Severity of one [`ToolResolver::validate`] finding (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ValidationEntry {
    pub level: ValidationLevel,
    pub message: String,
}

/// Resolves a [`Tool`] from a [`Message`] (§4.5, §6).
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(&self, message: &Message) -> GraphResult<Arc<dyn Tool>>;
    /// Build-time validation findings; an empty registry means "validation
    /// is skipped" (late wiring is permitted) per §4.5.
    fn validate(&self) -> Vec<ValidationEntry>;
    fn display_name(&self) -> String;
}

/// Always resolves to the same bound tool.
pub struct StaticResolver {
    tool: Arc<dyn Tool>,
}

impl StaticResolver {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        StaticResolver { tool }
    }
}

#[async_trait]
impl ToolResolver for StaticResolver {
    async fn resolve(&self, _message: &Message) -> GraphResult<Arc<dyn Tool>> {
        Ok(self.tool.clone())
    }

    fn validate(&self) -> Vec<ValidationEntry> {
        Vec::new()
    }

    fn display_name(&self) -> String {
        format!("static({})", self.tool.name())
    }
}

/// Process-wide (or test-scoped) tool lookup table, keyed by `(namespace,
/// name)`. Deliberately not a singleton — callers construct and pass one in,
/// so tests never share mutable global state.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<(String, String), Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, namespace: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.insert((namespace.into(), tool.name().to_string()), tool);
    }

    pub fn lookup(&self, namespace: &str, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// Selects `(name, namespace)` from a message and looks the tool up in a
/// shared [`ToolRegistry`]; `ToolLookupError` on miss (§4.5).
pub struct RegistryResolver {
    registry: Arc<ToolRegistry>,
    namespace: String,
    name_key: String,
    expected_tools: Vec<String>,
    strict: bool,
}

impl RegistryResolver {
    pub fn new(registry: Arc<ToolRegistry>, namespace: impl Into<String>, name_key: impl Into<String>) -> Self {
        RegistryResolver {
            registry,
            namespace: namespace.into(),
            name_key: name_key.into(),
            expected_tools: Vec::new(),
            strict: false,
        }
    }

    pub fn with_expected_tools(mut self, expected: Vec<String>, strict: bool) -> Self {
        self.expected_tools = expected;
        self.strict = strict;
        self
    }
}

#[async_trait]
impl ToolResolver for RegistryResolver {
    async fn resolve(&self, message: &Message) -> GraphResult<Arc<dyn Tool>> {
        let name = message
            .data
            .get(&self.name_key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| GraphError::execution(format!("missing '{}' in message data", self.name_key)))?;
        self.registry
            .lookup(&self.namespace, name)
            .ok_or_else(|| GraphError::tool_lookup(name.to_string(), Some(self.namespace.clone())))
    }

    /// With a non-empty registry, missing expected tools are WARNING (or
    /// ERROR when `strict`); with an empty registry, validation is skipped
    /// entirely to permit late wiring (§4.5).
    fn validate(&self) -> Vec<ValidationEntry> {
        if self.registry.is_empty() {
            return Vec::new();
        }
        self.expected_tools
            .iter()
            .filter(|name| self.registry.lookup(&self.namespace, name).is_none())
            .map(|name| ValidationEntry {
                level: if self.strict { ValidationLevel::Error } else { ValidationLevel::Warning },
                message: format!("expected tool '{name}' not found in namespace '{}'", self.namespace),
            })
            .collect()
    }

    fn display_name(&self) -> String {
        format!("registry(ns={})", self.namespace)
    }
}

/// User-supplied selector function. Exceptions (the selector returning an
/// `Err`) become `ToolLookupError` (§4.5).
pub struct DynamicResolver<F>
where
    F: Fn(&Message) -> Option<Arc<dyn Tool>> + Send + Sync,
{
    selector: F,
    display_name: String,
}

impl<F> DynamicResolver<F>
where
    F: Fn(&Message) -> Option<Arc<dyn Tool>> + Send + Sync,
{
    pub fn new(display_name: impl Into<String>, selector: F) -> Self {
        DynamicResolver { selector, display_name: display_name.into() }
    }
}

#[async_trait]
impl<F> ToolResolver for DynamicResolver<F>
where
    F: Fn(&Message) -> Option<Arc<dyn Tool>> + Send + Sync,
{
    async fn resolve(&self, message: &Message) -> GraphResult<Arc<dyn Tool>> {
        (self.selector)(message)
            .ok_or_else(|| GraphError::tool_lookup(self.display_name.clone(), None))
    }

    fn validate(&self) -> Vec<ValidationEntry> {
        Vec::new()
    }

    fn display_name(&self) -> String {
        format!("dynamic({})", self.display_name)
    }
}

/// Tries each resolver in order until one succeeds; aggregates errors on
/// total failure (§4.5).
pub struct FallbackResolver {
    resolvers: Vec<Arc<dyn ToolResolver>>,
}

impl FallbackResolver {
    pub fn new(resolvers: Vec<Arc<dyn ToolResolver>>) -> Self {
        FallbackResolver { resolvers }
    }
}

#[async_trait]
impl ToolResolver for FallbackResolver {
    async fn resolve(&self, message: &Message) -> GraphResult<Arc<dyn Tool>> {
        let mut errors = Vec::new();
        for resolver in &self.resolvers {
            match resolver.resolve(message).await {
                Ok(tool) => return Ok(tool),
                Err(e) => errors.push(format!("{}: {}", resolver.display_name(), e)),
            }
        }
        Err(GraphError::tool_lookup(self.display_name(), None)
            .with_context("attempts", errors.join("; ")))
    }

    fn validate(&self) -> Vec<ValidationEntry> {
        self.resolvers.iter().flat_map(|r| r.validate()).collect()
    }

    fn display_name(&self) -> String {
        format!(
            "fallback({})",
            self.resolvers.iter().map(|r| r.display_name()).collect::<Vec<_>>().join(" -> ")
        )
    }
}
