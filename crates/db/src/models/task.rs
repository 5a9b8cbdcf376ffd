//! Task row model.

use flowd_core::error::{EngineError, EngineResult};
use flowd_core::execution::ExecutionError;
use flowd_core::task::Task;
use flowd_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::parse_enum;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: DbId,
    pub execution_id: DbId,
    pub node_id: String,
    pub task_type: String,
    pub status: String,
    pub priority: i32,
    pub tags: serde_json::Value,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub retries: i32,
    pub max_retries: i32,
    pub worker_id: Option<DbId>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl TaskRow {
    pub fn into_domain(self) -> EngineResult<Task> {
        let tags: Vec<String> = serde_json::from_value(self.tags)
            .map_err(|e| EngineError::Store(format!("invalid tags: {e}")))?;
        let error: Option<ExecutionError> = match self.error {
            Some(v) => Some(
                serde_json::from_value(v)
                    .map_err(|e| EngineError::Store(format!("invalid error payload: {e}")))?,
            ),
            None => None,
        };
        Ok(Task {
            id: self.id,
            execution_id: self.execution_id,
            node_id: self.node_id,
            task_type: self.task_type,
            status: parse_enum("status", &self.status)?,
            priority: self.priority,
            tags,
            input: self.input,
            output: self.output,
            error,
            retries: self.retries.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
            worker_id: self.worker_id,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
