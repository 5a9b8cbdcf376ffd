//! Built-in node handlers for the native backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowd_sandbox::{HandlerRegistry, NodeHandler};
use serde_json::{json, Value};

/// Pauses for `config.delay_ms` milliseconds.
struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn run(&self, _node_type: &str, input: Value) -> Result<Value, String> {
        let ms = input["config"]["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({"delayed_ms": ms}))
    }
}

/// The handlers every host ships with.
///
/// - `noop` passes its input through unchanged.
/// - `log` emits the input at info level and passes it through.
/// - `delay` sleeps for a configured number of milliseconds.
pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("noop", |input| Ok(input));
    registry.register_fn("log", |input| {
        tracing::info!(payload = %input, "log node");
        Ok(input)
    });
    registry.register("delay", Arc::new(DelayHandler));
    registry
}
