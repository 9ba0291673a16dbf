//! Structured logging for graph execution.
//!
//! One span per run (`graph_id`, `run_id`); one event per node transition,
//! tool invocation, retry attempt, and cache hit/miss, all through `tracing`
//! so output composes with whatever subscriber the host process installs.

use std::fmt::Debug;
use tracing::Span;

use crate::error::GraphError;

/// Open the span a whole `execute`/`resume` call runs inside.
///
/// Callers should `.entered()` (or `.in_scope`) this for the lifetime of the
/// run; every event logged below is emitted inside it and inherits
/// `graph_id`/`run_id` without repeating them at each call site.
pub fn run_span(graph_id: &str, run_id: &str) -> Span {
    tracing::info_span!("graph_run", graph_id = graph_id, run_id = run_id)
}

pub fn log_run_started(graph_id: &str, entry_point: &str) {
    tracing::info!(graph_id, entry_point, "run started");
}

pub fn log_run_completed(graph_id: &str, run_id: &str) {
    tracing::info!(graph_id, run_id, "run completed");
}

pub fn log_run_failed(graph_id: &str, run_id: &str, error: &GraphError) {
    tracing::error!(graph_id, run_id, %error, "run failed");
}

pub fn log_run_waiting(graph_id: &str, run_id: &str, node_id: &str) {
    tracing::info!(graph_id, run_id, node_id, "run paused for human input");
}

pub fn log_node_started(node_id: &str, attempt: u32) {
    tracing::debug!(node_id, attempt, "node started");
}

pub fn log_node_completed(node_id: &str, state: &str) {
    tracing::debug!(node_id, state, "node completed");
}

pub fn log_node_state<S: Debug>(node_id: &str, state: &S) {
    tracing::trace!(node_id, state = ?state, "node input state");
}

pub fn log_node_error(node_id: &str, error: &GraphError) {
    tracing::warn!(node_id, %error, recoverable = error.is_recoverable(), "node dispatch failed");
}

pub fn log_retry_attempt(node_id: &str, attempt: u32, max_attempts: u32, backoff_ms: u64) {
    tracing::warn!(
        node_id,
        attempt,
        max_attempts,
        backoff_ms,
        "retrying node after failure"
    );
}

pub fn log_retry_exhausted(node_id: &str, attempts: u32) {
    tracing::error!(node_id, attempts, "retry attempts exhausted");
}

pub fn log_cache_hit(node_id: &str, step_key: &str) {
    tracing::debug!(node_id, step_key, "idempotency cache hit, skipping dispatch");
}

pub fn log_cache_miss(node_id: &str, step_key: &str) {
    tracing::trace!(node_id, step_key, "idempotency cache miss");
}

pub fn log_cache_error(error: &crate::cache::CacheError) {
    tracing::warn!(%error, "cache operation failed; continuing without it");
}

pub fn log_edge_selected(from: &str, to: &str, is_fallback: bool) {
    tracing::debug!(from, to, is_fallback, "edge selected");
}

pub fn log_no_edge(node_id: &str) {
    tracing::debug!(node_id, "no matching outgoing edge; run completing");
}
