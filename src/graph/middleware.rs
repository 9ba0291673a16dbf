//! Middleware chain: `beforeNode` / `afterNode` / `onError` hooks (§4.7).

use async_trait::async_trait;

use crate::error::{GraphError, GraphResult};
use crate::message::Message;

/// What the runner does after `onError` runs (§4.7). The first non-`Propagate`
/// action from the chain wins; declared order otherwise.
#[derive(Clone)]
pub enum ErrorAction {
    /// Default: let the error continue to fail the run.
    Propagate,
    /// Move on with the message as it stood before the failing node ran.
    Skip,
    /// Re-enter the current node.
    Retry,
    /// Continue the run with a substituted message.
    Fallback(Box<Message>),
}

impl std::fmt::Debug for ErrorAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorAction::Propagate => write!(f, "Propagate"),
            ErrorAction::Skip => write!(f, "Skip"),
            ErrorAction::Retry => write!(f, "Retry"),
            ErrorAction::Fallback(_) => write!(f, "Fallback(..)"),
        }
    }
}

/// One middleware in the chain. Hooks are composable; execution order for
/// `beforeNode`/`afterNode` is declared order, same for `onError` (§4.7).
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before_node(&self, message: Message) -> GraphResult<Message> {
        Ok(message)
    }

    async fn after_node(&self, message: Message) -> GraphResult<Message> {
        Ok(message)
    }

    /// Defaults to `Propagate`: a middleware that doesn't override `on_error`
    /// lets the error continue unhandled.
    async fn on_error(&self, _error: &GraphError, _message: &Message) -> ErrorAction {
        ErrorAction::Propagate
    }
}

/// Runs the `beforeNode` chain in declared order, short-circuiting on the
/// first `Err`.
pub async fn run_before_chain(chain: &[std::sync::Arc<dyn Middleware>], mut message: Message) -> GraphResult<Message> {
    for mw in chain {
        message = mw.before_node(message).await?;
    }
    Ok(message)
}

/// Runs the `afterNode` chain in declared order, short-circuiting on the
/// first `Err`.
pub async fn run_after_chain(chain: &[std::sync::Arc<dyn Middleware>], mut message: Message) -> GraphResult<Message> {
    for mw in chain {
        message = mw.after_node(message).await?;
    }
    Ok(message)
}

/// Runs the `onError` chain, returning the first non-`Propagate` verdict, or
/// `Propagate` if every middleware propagates (§4.7).
pub async fn run_error_chain(
    chain: &[std::sync::Arc<dyn Middleware>],
    error: &GraphError,
    message: &Message,
) -> ErrorAction {
    for mw in chain {
        match mw.on_error(error, message).await {
            ErrorAction::Propagate => continue,
            other => return other,
        }
    }
    ErrorAction::Propagate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Tagging(String);

    #[async_trait]
    impl Middleware for Tagging {
        async fn before_node(&self, message: Message) -> GraphResult<Message> {
            Ok(message.with_metadata(self.0.clone(), serde_json::Value::Bool(true)))
        }
    }

    struct AlwaysSkip;

    #[async_trait]
    impl Middleware for AlwaysSkip {
        async fn on_error(&self, _error: &GraphError, _message: &Message) -> ErrorAction {
            ErrorAction::Skip
        }
    }

    #[tokio::test]
    async fn before_chain_runs_in_declared_order() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Tagging("a".into())), Arc::new(Tagging("b".into()))];
        let msg = Message::new("hi", "user");
        let result = run_before_chain(&chain, msg).await.unwrap();
        assert!(result.metadata.contains_key("a"));
        assert!(result.metadata.contains_key("b"));
    }

    #[tokio::test]
    async fn error_chain_stops_at_first_non_propagate() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(AlwaysSkip)];
        let msg = Message::new("hi", "user");
        let action = run_error_chain(&chain, &GraphError::tool("x"), &msg).await;
        assert!(matches!(action, ErrorAction::Skip));
    }
}
