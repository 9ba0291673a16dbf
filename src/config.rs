//! Per-invocation run configuration.
//!
//! Carries thread/checkpoint identifiers threaded through a run, generalized
//! to this core's run/idempotency/checkpoint concerns.

use std::time::Duration;

use crate::cache::CachePolicy;

/// Per-run configuration supplied by the caller of [`crate::graph::GraphRunner`].
///
/// This core has no outward-facing process configuration surface (no CLI
/// flags, no env parsing) — callers
/// build this directly. `cache_policy` overrides the graph's default TTLs;
/// `resume_from_node_id` is consumed only by the checkpoint-store-backed
/// runner variant ([`crate::memory::CheckpointingRunner`]).
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Whether the idempotency manager is consulted for this run. Defaults
    /// to the graph's own setting when `None`.
    pub idempotency_enabled: Option<bool>,
    /// Per-kind TTL overrides for this run; falls back to the graph/store
    /// defaults where a field is `None`.
    pub cache_policy: Option<CachePolicy>,
    /// Escape hatch for [`crate::memory::CheckpointingRunner::resume_from_checkpoint`]:
    /// continue from the node following this id rather than the node stored
    /// in the checkpoint.
    pub resume_from_node_id: Option<String>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idempotency(mut self, enabled: bool) -> Self {
        self.idempotency_enabled = Some(enabled);
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    pub fn with_resume_from_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.resume_from_node_id = Some(node_id.into());
        self
    }
}

/// How often the checkpoint-store-backed runner snapshots in-flight runs
/// (SPEC_FULL §B): after every `every_n_nodes` node completions, or after
/// `every_interval` elapsed, whichever comes first, and always on error.
#[derive(Debug, Clone)]
pub struct CheckpointCadence {
    pub every_n_nodes: Option<u32>,
    pub every_interval: Option<Duration>,
}

impl Default for CheckpointCadence {
    fn default() -> Self {
        CheckpointCadence {
            every_n_nodes: Some(1),
            every_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_builders_set_fields() {
        let cfg = RunConfig::new()
            .with_idempotency(true)
            .with_resume_from_node_id("a");
        assert_eq!(cfg.idempotency_enabled, Some(true));
        assert_eq!(cfg.resume_from_node_id.as_deref(), Some("a"));
    }

    #[test]
    fn checkpoint_cadence_default_is_every_node() {
        let cadence = CheckpointCadence::default();
        assert_eq!(cadence.every_n_nodes, Some(1));
        assert!(cadence.every_interval.is_none());
    }
}
