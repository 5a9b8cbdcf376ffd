//! Execution row model.

use std::collections::HashMap;

use flowd_core::error::{EngineError, EngineResult};
use flowd_core::execution::{Execution, ExecutionError, NodeExecution};
use flowd_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::parse_enum;

/// A row from the `executions` table.
///
/// `node_executions` is the serialized per-node map; the aggregate owns
/// it, so the database only ever sees whole-map snapshots.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub id: DbId,
    pub workflow_id: DbId,
    pub workflow_version: i32,
    pub user_id: DbId,
    pub trigger_type: String,
    pub status: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub node_executions: serde_json::Value,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub created_at: Timestamp,
}

impl ExecutionRow {
    pub fn into_domain(self) -> EngineResult<Execution> {
        let node_executions: HashMap<String, NodeExecution> =
            serde_json::from_value(self.node_executions)
                .map_err(|e| EngineError::Store(format!("invalid node_executions: {e}")))?;
        let error: Option<ExecutionError> = match self.error {
            Some(v) => Some(
                serde_json::from_value(v)
                    .map_err(|e| EngineError::Store(format!("invalid error payload: {e}")))?,
            ),
            None => None,
        };
        Ok(Execution {
            id: self.id,
            workflow_id: self.workflow_id,
            workflow_version: self.workflow_version,
            user_id: self.user_id,
            trigger: parse_enum("trigger_type", &self.trigger_type)?,
            status: parse_enum("status", &self.status)?,
            input: self.input,
            output: self.output,
            error,
            node_executions,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
            created_at: self.created_at,
        })
    }
}
