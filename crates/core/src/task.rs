//! Schedulable task entity and its retry lifecycle.
//!
//! A [`Task`] is the unit of work the cluster scheduler tracks for one
//! node's execution. Created pending, moved to running by dispatch,
//! completed with output, or failed with either an automatic requeue
//! (below `max_retries`) or a terminal failure.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::ExecutionError;
use crate::types::{DbId, Timestamp};

/// Priority value for urgent tasks. Dispatched before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal tasks. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background tasks. Dispatched last.
pub const PRIORITY_BACKGROUND: i32 = -10;

/// Default number of automatic retries when the submitter does not say.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Outcome of [`Task::fail_attempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Retries remained; the task went back to pending and must be
    /// requeued by the scheduler.
    Requeued,
    /// Retries exhausted; the task is terminally failed and must never
    /// re-enter the queue.
    Exhausted,
}

/// A schedulable unit of work for one node's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: DbId,
    pub execution_id: DbId,
    pub node_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub priority: i32,
    /// Capability tags a worker must possess to run this task.
    pub tags: Vec<String>,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<ExecutionError>,
    pub retries: u32,
    pub max_retries: u32,
    pub worker_id: Option<DbId>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Task {
    /// Build a new pending task from submission input. The id is assigned
    /// by the store on creation.
    pub fn from_input(input: SubmitTaskInput) -> Self {
        Self {
            id: 0,
            execution_id: input.execution_id,
            node_id: input.node_id,
            task_type: input.task_type,
            status: TaskStatus::Pending,
            priority: input.priority.unwrap_or(PRIORITY_NORMAL),
            tags: input.tags.unwrap_or_default(),
            input: input.input,
            output: None,
            error: None,
            retries: 0,
            max_retries: input.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Dispatch bookkeeping: pending -> running, assigned to `worker_id`.
    pub fn dispatch_to(&mut self, worker_id: DbId) {
        self.status = TaskStatus::Running;
        self.worker_id = Some(worker_id);
        self.started_at = Some(Utc::now());
    }

    /// Record successful completion with its output.
    pub fn complete(&mut self, output: Value) {
        self.status = TaskStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    /// Record a failed attempt.
    ///
    /// Below `max_retries` the task goes back to pending with its worker
    /// assignment cleared; once exhausted it is terminally failed and the
    /// error and completion time are recorded. `retries` never exceeds
    /// `max_retries`.
    pub fn fail_attempt(&mut self, error: ExecutionError) -> FailOutcome {
        if self.retries < self.max_retries {
            self.retries += 1;
            self.status = TaskStatus::Pending;
            self.worker_id = None;
            self.started_at = None;
            FailOutcome::Requeued
        } else {
            self.status = TaskStatus::Failed;
            self.error = Some(error);
            self.completed_at = Some(Utc::now());
            FailOutcome::Exhausted
        }
    }
}

// ---------------------------------------------------------------------------
// Submission DTO
// ---------------------------------------------------------------------------

/// Input for submitting a task to the scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTaskInput {
    pub execution_id: DbId,
    pub node_id: String,
    pub task_type: String,
    pub priority: Option<i32>,
    pub input: Value,
    pub max_retries: Option<u32>,
    pub tags: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
