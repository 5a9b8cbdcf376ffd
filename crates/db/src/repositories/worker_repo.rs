//! Repository for the `workers` table.

use flowd_core::types::DbId;
use flowd_core::worker::Worker;
use sqlx::PgPool;

use crate::models::WorkerRow;

/// Column list for `workers` queries.
const COLUMNS: &str = "\
    id, name, host, port, status, capacity, current_load, tags, \
    last_heartbeat_at, registered_at";

/// Provides CRUD operations for the worker registry.
pub struct WorkerRepo;

impl WorkerRepo {
    /// Register a new worker, returning the stored row with its id.
    pub async fn insert(pool: &PgPool, worker: &Worker) -> Result<WorkerRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workers (name, host, port, status, capacity, current_load, tags, \
                last_heartbeat_at, registered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkerRow>(&query)
            .bind(&worker.name)
            .bind(&worker.host)
            .bind(worker.port as i32)
            .bind(worker.status.as_str())
            .bind(worker.capacity as i32)
            .bind(worker.current_load as i32)
            .bind(tags_json(worker))
            .bind(worker.last_heartbeat)
            .bind(worker.registered_at)
            .fetch_one(pool)
            .await
    }

    /// Find a worker by its id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<WorkerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE id = $1");
        sqlx::query_as::<_, WorkerRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Overwrite the mutable fields of an existing worker.
    pub async fn update(pool: &PgPool, worker: &Worker) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workers SET \
                status = $2, capacity = $3, current_load = $4, tags = $5, \
                last_heartbeat_at = $6 \
             WHERE id = $1",
        )
        .bind(worker.id)
        .bind(worker.status.as_str())
        .bind(worker.capacity as i32)
        .bind(worker.current_load as i32)
        .bind(tags_json(worker))
        .bind(worker.last_heartbeat)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Remove a worker from the registry.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// List all workers ordered by registration time, then id — the same
    /// deterministic order the selector uses for tie-breaks.
    pub async fn list(pool: &PgPool) -> Result<Vec<WorkerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers ORDER BY registered_at ASC, id ASC");
        sqlx::query_as::<_, WorkerRow>(&query).fetch_all(pool).await
    }

    /// Workers currently able to accept work: not offline, spare capacity.
    pub async fn find_available(pool: &PgPool) -> Result<Vec<WorkerRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workers \
             WHERE status <> 'offline' AND current_load < capacity \
             ORDER BY registered_at ASC, id ASC"
        );
        sqlx::query_as::<_, WorkerRow>(&query).fetch_all(pool).await
    }
}

fn tags_json(worker: &Worker) -> serde_json::Value {
    serde_json::to_value(&worker.tags).unwrap_or_else(|_| serde_json::json!([]))
}
