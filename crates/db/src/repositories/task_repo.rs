//! Repository for the `tasks` table.

use flowd_core::task::Task;
use flowd_core::types::DbId;
use sqlx::PgPool;

use crate::models::TaskRow;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, execution_id, node_id, task_type, status, priority, tags, \
    input, output, error, retries, max_retries, worker_id, \
    created_at, started_at, completed_at";

/// Provides CRUD operations for tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a new task, returning the stored row with its id.
    pub async fn insert(pool: &PgPool, task: &Task) -> Result<TaskRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (execution_id, node_id, task_type, status, priority, tags, \
                input, output, error, retries, max_retries, worker_id, created_at, \
                started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task.execution_id)
            .bind(&task.node_id)
            .bind(&task.task_type)
            .bind(task.status.as_str())
            .bind(task.priority)
            .bind(tags_json(task))
            .bind(&task.input)
            .bind(&task.output)
            .bind(error_json(task))
            .bind(task.retries as i32)
            .bind(task.max_retries as i32)
            .bind(task.worker_id)
            .bind(task.created_at)
            .bind(task.started_at)
            .bind(task.completed_at)
            .fetch_one(pool)
            .await
    }

    /// Find a task by its id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Overwrite the mutable fields of an existing task.
    pub async fn update(pool: &PgPool, task: &Task) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET \
                status = $2, output = $3, error = $4, retries = $5, \
                worker_id = $6, started_at = $7, completed_at = $8 \
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(task.status.as_str())
        .bind(&task.output)
        .bind(error_json(task))
        .bind(task.retries as i32)
        .bind(task.worker_id)
        .bind(task.started_at)
        .bind(task.completed_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All pending tasks, highest priority first, oldest first within a
    /// priority.
    pub async fn find_pending(pool: &PgPool) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status = 'pending' \
             ORDER BY priority DESC, created_at ASC"
        );
        sqlx::query_as::<_, TaskRow>(&query).fetch_all(pool).await
    }

    /// All tasks belonging to one execution.
    pub async fn find_by_execution(
        pool: &PgPool,
        execution_id: DbId,
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks WHERE execution_id = $1 ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(execution_id)
            .fetch_all(pool)
            .await
    }
}

fn tags_json(task: &Task) -> serde_json::Value {
    serde_json::to_value(&task.tags).unwrap_or_else(|_| serde_json::json!([]))
}

fn error_json(task: &Task) -> Option<serde_json::Value> {
    task.error.as_ref().and_then(|e| serde_json::to_value(e).ok())
}
