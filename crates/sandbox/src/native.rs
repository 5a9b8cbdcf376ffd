//! Native in-process backend.
//!
//! Node logic is looked up in a [`HandlerRegistry`] by node type and run
//! on the current runtime. Isolation is limited to the deadline and
//! cooperative cancellation — this backend is meant for trusted, built-in
//! node types.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::backend::SandboxBackend;
use crate::request::{NodeExecutionRequest, NodeExecutionResult};
use crate::sandbox::Sandbox;

/// Implements the logic of one (or more) node types.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn run(&self, node_type: &str, input: Value) -> Result<Value, String>;
}

/// Registry of node handlers keyed by node type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.into(), handler);
    }

    /// Register a synchronous closure as the handler for `node_type`.
    pub fn register_fn<F>(&mut self, node_type: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        struct FnHandler<F>(F);

        #[async_trait]
        impl<F> NodeHandler for FnHandler<F>
        where
            F: Fn(Value) -> Result<Value, String> + Send + Sync,
        {
            async fn run(&self, _node_type: &str, input: Value) -> Result<Value, String> {
                (self.0)(input)
            }
        }

        self.register(node_type, Arc::new(FnHandler(f)));
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).cloned()
    }
}

/// In-process sandbox over a shared handler registry.
pub struct NativeSandbox {
    handlers: Arc<HandlerRegistry>,
}

impl NativeSandbox {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl Sandbox for NativeSandbox {
    fn backend(&self) -> SandboxBackend {
        SandboxBackend::Native
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: NodeExecutionRequest,
    ) -> NodeExecutionResult {
        let start = Instant::now();
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        let Some(handler) = self.handlers.get(&request.node_type) else {
            return NodeExecutionResult::failed(
                request.id,
                format!("no handler registered for node type \"{}\"", request.node_type),
                elapsed(start),
            );
        };

        let deadline = Duration::from_millis(request.constraints.timeout_ms);
        tokio::select! {
            _ = cancel.cancelled() => NodeExecutionResult::cancelled(request.id, elapsed(start)),
            run = tokio::time::timeout(deadline, handler.run(&request.node_type, request.input)) => {
                match run {
                    Ok(Ok(output)) => {
                        NodeExecutionResult::completed(request.id, output, elapsed(start))
                    }
                    Ok(Err(message)) => {
                        NodeExecutionResult::failed(request.id, message, elapsed(start))
                    }
                    Err(_) => NodeExecutionResult::timed_out(request.id, elapsed(start)),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::request::{Constraints, SandboxStatus};

    struct SleepHandler;

    #[async_trait]
    impl NodeHandler for SleepHandler {
        async fn run(&self, _node_type: &str, _input: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!(null))
        }
    }

    fn registry() -> Arc<HandlerRegistry> {
        let mut reg = HandlerRegistry::new();
        reg.register_fn("echo", |input| Ok(input));
        reg.register_fn("explode", |_| Err("kaboom".to_string()));
        reg.register("sleep", Arc::new(SleepHandler));
        Arc::new(reg)
    }

    fn request(node_type: &str, timeout_ms: u64) -> NodeExecutionRequest {
        NodeExecutionRequest::new(node_type, json!({"v": 7})).with_constraints(Constraints {
            timeout_ms,
            memory_mb: None,
            cpu_millis: None,
        })
    }

    #[tokio::test]
    async fn echo_handler_completes_with_output() {
        let sb = NativeSandbox::new(registry());
        let result = sb.execute(&CancellationToken::new(), request("echo", 1000)).await;
        assert_eq!(result.status, SandboxStatus::Completed);
        assert_eq!(result.output, Some(json!({"v": 7})));
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_result() {
        let sb = NativeSandbox::new(registry());
        let result = sb
            .execute(&CancellationToken::new(), request("explode", 1000))
            .await;
        assert_eq!(result.status, SandboxStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("kaboom"));
    }

    #[tokio::test]
    async fn unknown_node_type_fails() {
        let sb = NativeSandbox::new(registry());
        let result = sb
            .execute(&CancellationToken::new(), request("ghost", 1000))
            .await;
        assert_eq!(result.status, SandboxStatus::Failed);
    }

    #[tokio::test]
    async fn deadline_produces_timed_out() {
        let sb = NativeSandbox::new(registry());
        let result = sb.execute(&CancellationToken::new(), request("sleep", 20)).await;
        assert_eq!(result.status, SandboxStatus::TimedOut);
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_work() {
        let sb = NativeSandbox::new(registry());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result = sb.execute(&cancel, request("sleep", 60_000)).await;
        assert_eq!(result.status, SandboxStatus::Cancelled);
    }
}
