//! Execution aggregate and its state machine.
//!
//! One [`Execution`] is one run of a workflow from trigger to terminal
//! state. It owns one [`NodeExecution`] record per node that was scheduled
//! at least once. Status moves only along the transition table in
//! [`ExecutionStatus::can_transition`]; terminal states are immutable and
//! `duration_ms` is stamped exactly once, at the terminal transition.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What started an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Api,
    Webhook,
    Schedule,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Api => "api",
            Self::Webhook => "webhook",
            Self::Schedule => "schedule",
        }
    }
}

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed, and cancelled are terminal and unreachable from
    /// each other.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition from `self` to `to` is allowed.
    pub fn can_transition(&self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match self {
            Pending => matches!(to, Running),
            Running => matches!(to, Paused | Completed | Failed | Cancelled),
            Paused => matches!(to, Running | Completed | Failed | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }
}

/// Per-node status within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

// ---------------------------------------------------------------------------
// Structured error payload
// ---------------------------------------------------------------------------

/// Structured error recorded on a failed execution or node.
///
/// No execution silently disappears: every terminal failure carries one of
/// these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Machine-readable code, e.g. `"timeout"`, `"node_failed"`.
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ExecutionError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ---------------------------------------------------------------------------
// NodeExecution
// ---------------------------------------------------------------------------

/// Record of one node's run within an execution.
///
/// Owned exclusively by the orchestrator driving the parent execution;
/// never mutated externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    pub error: Option<ExecutionError>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub retry_count: u32,
    pub input: Value,
    pub output: Option<Value>,
}

impl NodeExecution {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>, input: Value) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            status: NodeStatus::Pending,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            retry_count: 0,
            input,
            output: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = NodeStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn complete(&mut self, output: Value) {
        self.output = Some(output);
        self.finish(NodeStatus::Completed);
    }

    pub fn fail(&mut self, error: ExecutionError) {
        self.error = Some(error);
        self.finish(NodeStatus::Failed);
    }

    /// Mark a node that will never run because an upstream dependency
    /// failed.
    pub fn skip(&mut self) {
        self.status = NodeStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    fn finish(&mut self, status: NodeStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One run of a workflow from trigger to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: DbId,
    pub workflow_id: DbId,
    pub workflow_version: i32,
    pub user_id: DbId,
    pub trigger: TriggerType,
    pub status: ExecutionStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<ExecutionError>,
    /// One entry per node scheduled at least once, keyed by node id.
    pub node_executions: HashMap<String, NodeExecution>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub created_at: Timestamp,
}

impl Execution {
    /// Build a new pending execution. The id is assigned by the store on
    /// first save.
    pub fn new(
        workflow_id: DbId,
        workflow_version: i32,
        user_id: DbId,
        trigger: TriggerType,
        input: Value,
    ) -> Self {
        Self {
            id: 0,
            workflow_id,
            workflow_version,
            user_id,
            trigger,
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error: None,
            node_executions: HashMap::new(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            created_at: Utc::now(),
        }
    }

    // ── State machine ────────────────────────────────────────────────────

    /// pending -> running. Stamps `started_at`.
    pub fn start(&mut self) -> EngineResult<()> {
        self.transition(ExecutionStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running -> paused.
    pub fn pause(&mut self) -> EngineResult<()> {
        if self.status != ExecutionStatus::Running {
            return Err(self.invalid(ExecutionStatus::Paused));
        }
        self.status = ExecutionStatus::Paused;
        Ok(())
    }

    /// paused -> running.
    pub fn resume(&mut self) -> EngineResult<()> {
        if self.status != ExecutionStatus::Paused {
            return Err(self.invalid(ExecutionStatus::Running));
        }
        self.status = ExecutionStatus::Running;
        Ok(())
    }

    /// {running,paused} -> completed. Stamps output and duration.
    pub fn complete(&mut self, output: Value) -> EngineResult<()> {
        self.transition(ExecutionStatus::Completed)?;
        self.output = Some(output);
        self.finish();
        Ok(())
    }

    /// {running,paused} -> failed, with a structured error.
    pub fn fail(&mut self, error: ExecutionError) -> EngineResult<()> {
        self.transition(ExecutionStatus::Failed)?;
        self.error = Some(error);
        self.finish();
        Ok(())
    }

    /// {running,paused} -> cancelled.
    pub fn cancel(&mut self) -> EngineResult<()> {
        self.transition(ExecutionStatus::Cancelled)?;
        self.finish();
        Ok(())
    }

    fn transition(&mut self, to: ExecutionStatus) -> EngineResult<()> {
        if !self.status.can_transition(to) {
            return Err(self.invalid(to));
        }
        self.status = to;
        Ok(())
    }

    fn invalid(&self, to: ExecutionStatus) -> EngineError {
        EngineError::InvalidTransition {
            entity: "execution",
            from: self.status.as_str(),
            to: to.as_str(),
        }
    }

    /// Stamp `completed_at` and `duration_ms`. Called exactly once, from
    /// the terminal transition.
    fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    // ── Node bookkeeping ─────────────────────────────────────────────────

    /// Insert the record for a node being scheduled for the first time.
    /// A second schedule of the same node reuses the existing record.
    pub fn record_node(&mut self, node: NodeExecution) -> &mut NodeExecution {
        self.node_executions
            .entry(node.node_id.clone())
            .or_insert(node)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeExecution> {
        self.node_executions.get_mut(node_id)
    }

    /// True once every recorded node reached a terminal status.
    pub fn all_nodes_terminal(&self) -> bool {
        self.node_executions.values().all(|n| n.status.is_terminal())
    }
}

// ---------------------------------------------------------------------------
// Inbound commands / queries
// ---------------------------------------------------------------------------

/// Command from the (excluded) transport layer to start an execution.
#[derive(Debug, Clone, Deserialize)]
pub struct StartExecutionCommand {
    pub workflow_id: DbId,
    pub user_id: DbId,
    pub trigger: TriggerType,
    pub input: Value,
}

/// Paged listing query for a user's executions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListExecutionsQuery {
    pub user_id: DbId,
    pub workflow_id: Option<DbId>,
    pub status: Option<ExecutionStatus>,
    pub offset: i64,
    pub limit: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
