//! # graphcore
//!
//! A directed-graph orchestration engine for running typed, immutable
//! messages through user-defined graphs of agents, tools, and subgraphs.
//!
//! ## Design principles
//!
//! - **One message, many nodes**: a single [`Message`] envelope flows
//!   through every node; nodes never share mutable state outside of it.
//! - **Explicit state machine**: every run tracks its
//!   [`ExecutionState`] with a validated transition table and an
//!   append-only history — no implicit state.
//! - **Closed node variants**: [`graph::node::GraphNode`] is a tagged enum
//!   (Agent/Tool/Subgraph/Output/Parallel/Merge/Custom) rather than an open
//!   trait-object hierarchy, so the runner can special-case dispatch for the
//!   variants that need it (tool resolution, subgraph recursion) while
//!   everything else goes through the plain [`graph::Node`] trait.
//! - **Idempotent by step**: the idempotency manager keys cached results by
//!   `(nodeId, intentSignature)`, so a replayed step with the same intent
//!   returns the cached result instead of re-running side effects.
//! - **Human-in-the-loop via subgraphs**: a subgraph that pauses bubbles a
//!   WAITING state up through its parent without flattening the nesting —
//!   [`graph::subgraph::SubgraphCheckpointContext`] frames record exactly how
//!   to resume.
//!
//! ## Main modules
//!
//! - [`message`]: [`Message`], [`ExecutionState`], [`message::ToolCallRecord`] — the envelope that
//!   flows through every run.
//! - [`error`]: [`error::GraphError`], [`error::GraphResult`] — the error sum type and its
//!   recoverability predicate.
//! - [`graph`]: [`graph::Graph`], [`graph::GraphBuilder`], [`graph::Edge`], [`graph::GraphRunner`] — build and run graphs.
//! - [`graph::node`]: [`graph::node::GraphNode`] variants — [`graph::node::AgentNode`], [`graph::node::ToolNode`],
//!   [`graph::node::SubgraphNode`], [`graph::node::OutputNode`], [`graph::node::ParallelNode`], [`graph::node::MergeNode`].
//! - [`graph::tool`]: [`graph::tool::Tool`], [`graph::tool::ToolResolver`], [`graph::tool::ToolRegistry`] — tool resolution and validation.
//! - [`graph::retry`]: [`graph::retry::RetryPolicy`], [`graph::retry::execute_with_retry`] — backoff-driven retry.
//! - [`graph::middleware`]: [`graph::middleware::Middleware`], [`graph::middleware::ErrorAction`] — before/after/error hooks.
//! - [`graph::listeners`]: [`graph::listeners::ToolLifecycleListener`] — per-tool-call observation.
//! - [`graph::events`]: [`graph::events::LifecycleEventBus`], [`graph::events::ToolCallEventBus`] — `graph.*`/`node.*`/`hitl.*` topics.
//! - [`graph::subgraph`]: [`graph::subgraph::SubgraphCheckpointContext`] — nested-pause checkpoint frames.
//! - [`cache`]: [`cache::IdempotencyStore`], [`cache::VectorCache`] — step replay and intent side-caches.
//! - [`memory`]: [`memory::CheckpointStore`], [`memory::CheckpointingRunner`] — durable run snapshots and resume-from-checkpoint.
//! - [`config`]: [`config::RunConfig`], [`config::CheckpointCadence`] — per-run configuration.
//!
//! Key types are re-exported at crate root: `use graphcore::{Message, Graph, GraphBuilder, GraphRunner};`.

pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod memory;
pub mod message;

pub use cache::in_memory::{InMemoryIdempotencyStore, InMemoryVectorCache};
pub use cache::{CacheError, CachePolicy, CacheStats, IdempotencyStore, StepKey, VectorCache, VectorCacheEntry};
pub use config::{CheckpointCadence, RunConfig};
pub use error::{GraphError, GraphResult};
pub use graph::events::{EventBuses, LifecycleEvent, LifecycleEventBus, ToolCallEmitted, ToolCallEventBus};
pub use graph::listeners::{ToolInvocationContext, ToolLifecycleListener};
pub use graph::middleware::{ErrorAction, Middleware};
pub use graph::node::GraphNode;
pub use graph::retry::{BackoffStrategy, RetryOutcome, RetryPolicy};
pub use graph::subgraph::SubgraphCheckpointContext;
pub use graph::tool::{Tool, ToolContext, ToolRegistry, ToolResolver, ToolResult};
pub use graph::{Edge, Graph, GraphBuilder, GraphRunner, Node};
pub use memory::{Checkpoint, CheckpointStore, CheckpointingRunner, InMemoryCheckpointStore};
pub use message::{ExecutionState, Message, StateTransitionRecord, ToolCallRecord};

#[cfg(feature = "redis-backend")]
pub use cache::redis_store::RedisIdempotencyStore;
#[cfg(feature = "redis-backend")]
pub use graph::events_redis::{redis_event_buses, RedisLifecycleEventBus};
#[cfg(feature = "kafka-backend")]
pub use graph::events_kafka::KafkaLifecycleEventBus;
#[cfg(feature = "sqlite-backend")]
pub use memory::SqliteCheckpointStore;
