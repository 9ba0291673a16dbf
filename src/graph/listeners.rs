//! Tool invocation listener contract (§4.13).

use async_trait::async_trait;
use serde_json::Value;

use super::tool::{Tool, ToolContext, ToolResult};
use crate::error::{GraphError, GraphResult};
use std::sync::Arc;

/// Carries everything a listener might want to log or correlate (§4.13).
#[derive(Clone)]
pub struct ToolInvocationContext {
    pub tool: Arc<dyn Tool>,
    pub tool_context: ToolContext,
    pub params: Value,
    pub attempt_number: u32,
}

/// `onInvoke`/`onSuccess`/`onFailure`/`onComplete` hooks around one tool
/// call. `onComplete` always fires, even when `execute` raises; `onSuccess`
/// fires on `Ok(ToolResult)` regardless of `ToolResult.ok`; `onFailure` fires
/// only when `execute` itself returns `Err` (§4.13).
#[async_trait]
pub trait ToolLifecycleListener: Send + Sync {
    async fn on_invoke(&self, _ctx: &ToolInvocationContext) {}
    async fn on_success(&self, _ctx: &ToolInvocationContext, _result: &ToolResult, _duration_ms: u64) {}
    async fn on_failure(&self, _ctx: &ToolInvocationContext, _error: &GraphError, _duration_ms: u64) {}
    async fn on_complete(&self, _ctx: &ToolInvocationContext) {}
}

/// Invokes `tool.execute`, threading it through every listener in order.
/// Shared by `ToolNode`'s plain fallback `run` and the runner's
/// retry-wrapped dispatch path (§4.4 ToolNode note: "never executed
/// directly by the runner — the runner calls a helper that also threads
/// lifecycle listeners and retry").
pub async fn invoke_tool_with_listeners(
    tool: Arc<dyn Tool>,
    params: Value,
    tool_context: ToolContext,
    attempt_number: u32,
    listeners: &[Arc<dyn ToolLifecycleListener>],
) -> GraphResult<ToolResult> {
    let ctx = ToolInvocationContext {
        tool: tool.clone(),
        tool_context: tool_context.clone(),
        params: params.clone(),
        attempt_number,
    };
    for l in listeners {
        l.on_invoke(&ctx).await;
    }
    let start = std::time::Instant::now();
    let outcome = tool.execute(params, tool_context).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match &outcome {
        Ok(result) => {
            for l in listeners {
                l.on_success(&ctx, result, duration_ms).await;
            }
        }
        Err(err) => {
            for l in listeners {
                l.on_failure(&ctx, err, duration_ms).await;
            }
        }
    }
    for l in listeners {
        l.on_complete(&ctx).await;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tool::ToolResult as TR;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkTool;

    #[async_trait]
    impl Tool for OkTool {
        fn name(&self) -> &str {
            "ok"
        }
        fn description(&self) -> &str {
            "always ok"
        }
        fn schema(&self) -> Value {
            Value::Null
        }
        fn can_execute(&self, _p: &Value) -> bool {
            true
        }
        async fn execute(&self, params: Value, _ctx: ToolContext) -> GraphResult<TR> {
            Ok(TR::success(params))
        }
    }

    struct CountingListener {
        invoked: AtomicUsize,
        completed: AtomicUsize,
    }

    #[async_trait]
    impl ToolLifecycleListener for CountingListener {
        async fn on_invoke(&self, _ctx: &ToolInvocationContext) {
            self.invoked.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_complete(&self, _ctx: &ToolInvocationContext) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn on_complete_always_fires() {
        let listener = Arc::new(CountingListener {
            invoked: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        });
        let listeners: Vec<Arc<dyn ToolLifecycleListener>> = vec![listener.clone()];
        let _ = invoke_tool_with_listeners(
            Arc::new(OkTool),
            Value::Null,
            ToolContext::default(),
            1,
            &listeners,
        )
        .await
        .unwrap();
        assert_eq!(listener.invoked.load(Ordering::SeqCst), 1);
        assert_eq!(listener.completed.load(Ordering::SeqCst), 1);
    }
}
