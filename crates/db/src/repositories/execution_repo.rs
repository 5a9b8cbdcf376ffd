//! Repository for the `executions` table.

use flowd_core::execution::{Execution, ListExecutionsQuery};
use flowd_core::types::DbId;
use sqlx::PgPool;

use crate::models::ExecutionRow;

/// Column list for `executions` queries.
const COLUMNS: &str = "\
    id, workflow_id, workflow_version, user_id, trigger_type, status, \
    input, output, error, node_executions, \
    started_at, completed_at, duration_ms, created_at";

/// Maximum page size for execution listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for execution listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides CRUD operations for executions.
pub struct ExecutionRepo;

impl ExecutionRepo {
    /// Insert a new execution, returning the stored row with its id.
    pub async fn insert(pool: &PgPool, execution: &Execution) -> Result<ExecutionRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO executions (workflow_id, workflow_version, user_id, trigger_type, \
                status, input, output, error, node_executions, started_at, completed_at, \
                duration_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ExecutionRow>(&query)
            .bind(execution.workflow_id)
            .bind(execution.workflow_version)
            .bind(execution.user_id)
            .bind(execution.trigger.as_str())
            .bind(execution.status.as_str())
            .bind(&execution.input)
            .bind(&execution.output)
            .bind(error_json(execution))
            .bind(nodes_json(execution))
            .bind(execution.started_at)
            .bind(execution.completed_at)
            .bind(execution.duration_ms)
            .bind(execution.created_at)
            .fetch_one(pool)
            .await
    }

    /// Overwrite the mutable fields of an existing execution.
    pub async fn update(pool: &PgPool, execution: &Execution) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE executions SET \
                status = $2, output = $3, error = $4, node_executions = $5, \
                started_at = $6, completed_at = $7, duration_ms = $8 \
             WHERE id = $1",
        )
        .bind(execution.id)
        .bind(execution.status.as_str())
        .bind(&execution.output)
        .bind(error_json(execution))
        .bind(nodes_json(execution))
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Overwrite only the node records, leaving the externally controlled
    /// columns (status, control timestamps) untouched.
    pub async fn update_nodes(
        pool: &PgPool,
        execution: &Execution,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE executions SET node_executions = $2 WHERE id = $1")
            .bind(execution.id)
            .bind(nodes_json(execution))
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Find an execution by its id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ExecutionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM executions WHERE id = $1");
        sqlx::query_as::<_, ExecutionRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Page through a user's executions, newest first, with optional
    /// workflow and status filters.
    pub async fn list(
        pool: &PgPool,
        query: &ListExecutionsQuery,
    ) -> Result<Vec<ExecutionRow>, sqlx::Error> {
        let limit = if query.limit <= 0 {
            DEFAULT_LIMIT
        } else {
            query.limit.min(MAX_LIMIT)
        };
        let sql = format!(
            "SELECT {COLUMNS} FROM executions \
             WHERE user_id = $1 \
               AND ($2::bigint IS NULL OR workflow_id = $2) \
               AND ($3::text IS NULL OR status = $3) \
             ORDER BY created_at DESC \
             OFFSET $4 LIMIT $5"
        );
        sqlx::query_as::<_, ExecutionRow>(&sql)
            .bind(query.user_id)
            .bind(query.workflow_id)
            .bind(query.status.map(|s| s.as_str()))
            .bind(query.offset.max(0))
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Total number of executions a user owns.
    pub async fn count_by_user(pool: &PgPool, user_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM executions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }
}

fn error_json(execution: &Execution) -> Option<serde_json::Value> {
    execution
        .error
        .as_ref()
        .and_then(|e| serde_json::to_value(e).ok())
}

fn nodes_json(execution: &Execution) -> serde_json::Value {
    serde_json::to_value(&execution.node_executions).unwrap_or_else(|_| serde_json::json!({}))
}
