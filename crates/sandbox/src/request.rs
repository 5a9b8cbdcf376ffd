//! Sandbox request/result contract.
//!
//! Stateless per call: one [`NodeExecutionRequest`] in, one
//! [`NodeExecutionResult`] out, wall-clock duration recorded in
//! [`ExecMetrics`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-side default deadline when a request carries no timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Resource and time limits applied to a single node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    /// Wall-clock deadline in milliseconds.
    pub timeout_ms: u64,
    /// Memory ceiling; enforced only by backends that can.
    pub memory_mb: Option<u32>,
    /// CPU budget in millicores; enforced only by backends that can.
    pub cpu_millis: Option<u32>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            memory_mb: None,
            cpu_millis: None,
        }
    }
}

/// One node's worth of work handed to a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionRequest {
    /// Caller-chosen correlation id (the engine uses the task id).
    pub id: String,
    pub node_type: String,
    pub constraints: Constraints,
    pub input: Value,
}

impl NodeExecutionRequest {
    pub fn new(node_type: impl Into<String>, input: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            node_type: node_type.into(),
            constraints: Constraints::default(),
            input,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Terminal status of one sandboxed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Completed,
    Failed,
    /// Deadline exceeded; the work was interrupted, not left hanging.
    TimedOut,
    /// Caller cancellation observed before completion.
    Cancelled,
}

/// Measurements captured around one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecMetrics {
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Outcome of one sandboxed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub request_id: String,
    pub status: SandboxStatus,
    pub output: Option<Value>,
    pub metrics: ExecMetrics,
    pub error: Option<String>,
}

impl NodeExecutionResult {
    pub fn completed(request_id: impl Into<String>, output: Value, duration_ms: u64) -> Self {
        Self {
            request_id: request_id.into(),
            status: SandboxStatus::Completed,
            output: Some(output),
            metrics: ExecMetrics { duration_ms },
            error: None,
        }
    }

    pub fn failed(
        request_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            status: SandboxStatus::Failed,
            output: None,
            metrics: ExecMetrics { duration_ms },
            error: Some(error.into()),
        }
    }

    pub fn timed_out(request_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            request_id: request_id.into(),
            status: SandboxStatus::TimedOut,
            output: None,
            metrics: ExecMetrics { duration_ms },
            error: Some(format!("execution timed out after {duration_ms}ms")),
        }
    }

    pub fn cancelled(request_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            request_id: request_id.into(),
            status: SandboxStatus::Cancelled,
            output: None,
            metrics: ExecMetrics { duration_ms },
            error: Some("execution cancelled".to_string()),
        }
    }
}
