//! Structured error taxonomy for graph execution.
//!
//! One sum type, not an inheritance hierarchy, carrying the kind-specific
//! fields and the `context` map the graph runner, retry supervisor, and
//! error middleware all need (see `graph::retry` and `graph::middleware`).

use std::collections::HashMap;

use thiserror::Error;

/// A structured graph execution error.
///
/// Every variant carries a `context` map so that `with_context` can attach
/// diagnostic key/value pairs without losing the original error (errors are
/// value types: `with_context` returns a new `GraphError`).
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Graph or message is structurally illegal (bad edges, bad entry point,
    /// illegal state transition). Never retried, always surfaced.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        context: HashMap<String, String>,
    },

    /// An invariant was violated during execution (unknown node id reached
    /// mid-run, edge selection found no node and the message was not yet
    /// terminal, etc).
    #[error("execution error: {message}")]
    Execution {
        message: String,
        context: HashMap<String, String>,
    },

    /// A lookup failed. Raised as `Validation` if caught at graph-build time,
    /// `Execution`-severity (this variant) if caught at run time.
    #[error("lookup error: {message}")]
    Lookup {
        message: String,
        context: HashMap<String, String>,
    },

    /// A `ToolResolver` could not find the requested tool.
    #[error("tool lookup error: name={name} namespace={namespace:?}")]
    ToolLookup {
        name: String,
        namespace: Option<String>,
        context: HashMap<String, String>,
    },

    /// A tool ran but reported failure, or raised while running.
    #[error("tool error: {message}")]
    Tool {
        message: String,
        context: HashMap<String, String>,
    },

    /// Recoverable: transport/connectivity failure.
    #[error("network error: {message}")]
    Network {
        message: String,
        context: HashMap<String, String>,
    },

    /// Recoverable: an operation exceeded its deadline.
    #[error("timeout error: {message}")]
    Timeout {
        message: String,
        context: HashMap<String, String>,
    },

    /// Recoverable: caller has been throttled upstream.
    #[error("rate limit error: {message}")]
    RateLimit {
        message: String,
        context: HashMap<String, String>,
    },

    /// Recoverable: a transient failure that doesn't fit a narrower kind.
    #[error("retryable error: {message}")]
    Retryable {
        message: String,
        context: HashMap<String, String>,
    },

    /// Authorization/security failure. Always surfaced immediately.
    #[error("authorization error: {message}")]
    Authorization {
        message: String,
        context: HashMap<String, String>,
    },

    /// The run was cancelled; surfaced as a terminal CANCELLED state.
    #[error("cancelled: {message}")]
    Cancellation {
        message: String,
        context: HashMap<String, String>,
    },
}

impl GraphError {
    pub fn validation(message: impl Into<String>) -> Self {
        GraphError::Validation {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        GraphError::Execution {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn lookup(message: impl Into<String>) -> Self {
        GraphError::Lookup {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn tool_lookup(name: impl Into<String>, namespace: Option<String>) -> Self {
        GraphError::ToolLookup {
            name: name.into(),
            namespace,
            context: HashMap::new(),
        }
    }

    pub fn tool(message: impl Into<String>) -> Self {
        GraphError::Tool {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        GraphError::Network {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        GraphError::Timeout {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        GraphError::RateLimit {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        GraphError::Retryable {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        GraphError::Authorization {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn cancellation(message: impl Into<String>) -> Self {
        GraphError::Cancellation {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// A short machine-readable code, stable across `Display` wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::Validation { .. } => "validation_error",
            GraphError::Execution { .. } => "execution_error",
            GraphError::Lookup { .. } => "lookup_error",
            GraphError::ToolLookup { .. } => "tool_lookup_error",
            GraphError::Tool { .. } => "tool_error",
            GraphError::Network { .. } => "network_error",
            GraphError::Timeout { .. } => "timeout_error",
            GraphError::RateLimit { .. } => "rate_limit_error",
            GraphError::Retryable { .. } => "retryable_error",
            GraphError::Authorization { .. } => "authorization_error",
            GraphError::Cancellation { .. } => "cancellation_error",
        }
    }

    /// The recoverable subset the retry supervisor and `onError` middleware
    /// consult: Tool, Network, Timeout, RateLimit, Retryable. Everything else
    /// (Validation, Execution, Lookup, Authorization, Cancellation) is
    /// unrecoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GraphError::Tool { .. }
                | GraphError::Network { .. }
                | GraphError::Timeout { .. }
                | GraphError::RateLimit { .. }
                | GraphError::Retryable { .. }
        )
    }

    pub fn context(&self) -> &HashMap<String, String> {
        match self {
            GraphError::Validation { context, .. }
            | GraphError::Execution { context, .. }
            | GraphError::Lookup { context, .. }
            | GraphError::ToolLookup { context, .. }
            | GraphError::Tool { context, .. }
            | GraphError::Network { context, .. }
            | GraphError::Timeout { context, .. }
            | GraphError::RateLimit { context, .. }
            | GraphError::Retryable { context, .. }
            | GraphError::Authorization { context, .. }
            | GraphError::Cancellation { context, .. } => context,
        }
    }

    /// Returns a new error with `(key, value)` attached to its context map.
    /// Errors are value types; this never mutates `self`.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let ctx = match &mut self {
            GraphError::Validation { context, .. }
            | GraphError::Execution { context, .. }
            | GraphError::Lookup { context, .. }
            | GraphError::ToolLookup { context, .. }
            | GraphError::Tool { context, .. }
            | GraphError::Network { context, .. }
            | GraphError::Timeout { context, .. }
            | GraphError::RateLimit { context, .. }
            | GraphError::Retryable { context, .. }
            | GraphError::Authorization { context, .. }
            | GraphError::Cancellation { context, .. } => context,
        };
        ctx.insert(key.into(), value.into());
        self
    }
}

/// Result alias used throughout the crate, using `std::result` directly
/// rather than a hand-rolled `Success(T) | Failure(Error)` duplicate — the
/// two are isomorphic and this one composes with `?`.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: `with_context` attaches a key without mutating the
    /// original error's Display text.
    #[test]
    fn with_context_attaches_without_changing_display() {
        let err = GraphError::tool_lookup("missing", Some("ns".to_string()));
        let before = err.to_string();
        let enriched = err.with_context("node_id", "classifier");
        assert_eq!(enriched.to_string(), before);
        assert_eq!(
            enriched.context().get("node_id"),
            Some(&"classifier".to_string())
        );
    }

    /// **Scenario**: recoverable classification matches §4.2's split exactly.
    #[test]
    fn recoverable_subset_matches_taxonomy() {
        assert!(GraphError::tool("x").is_recoverable());
        assert!(GraphError::network("x").is_recoverable());
        assert!(GraphError::timeout("x").is_recoverable());
        assert!(GraphError::rate_limit("x").is_recoverable());
        assert!(GraphError::retryable("x").is_recoverable());

        assert!(!GraphError::validation("x").is_recoverable());
        assert!(!GraphError::execution("x").is_recoverable());
        assert!(!GraphError::lookup("x").is_recoverable());
        assert!(!GraphError::authorization("x").is_recoverable());
        assert!(!GraphError::cancellation("x").is_recoverable());
    }

    #[test]
    fn tool_lookup_error_display_contains_name_and_namespace() {
        let err = GraphError::tool_lookup("missing", Some("ns".to_string()));
        let s = err.to_string();
        assert!(s.contains("missing"));
        assert!(s.contains("ns"));
    }
}
