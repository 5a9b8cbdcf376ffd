//! Store-trait adapters over the repositories.
//!
//! The engine depends on the `flowd-core` store traits; these adapters
//! bind them to PostgreSQL. "Not found" is mapped onto
//! [`EngineError::NotFound`]; everything else becomes a `Store` error.

use async_trait::async_trait;
use flowd_core::error::{EngineError, EngineResult};
use flowd_core::execution::{Execution, ListExecutionsQuery};
use flowd_core::store::{ExecutionStore, TaskStore, WorkerStore};
use flowd_core::task::Task;
use flowd_core::types::DbId;
use flowd_core::worker::Worker;

use crate::repositories::{ExecutionRepo, TaskRepo, WorkerRepo};
use crate::DbPool;

fn store_err(err: sqlx::Error) -> EngineError {
    EngineError::Store(err.to_string())
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

pub struct PgExecutionStore {
    pool: DbPool,
}

impl PgExecutionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn save(&self, execution: Execution) -> EngineResult<Execution> {
        let row = ExecutionRepo::insert(&self.pool, &execution)
            .await
            .map_err(store_err)?;
        row.into_domain()
    }

    async fn update(&self, execution: &Execution) -> EngineResult<()> {
        let affected = ExecutionRepo::update(&self.pool, execution)
            .await
            .map_err(store_err)?;
        if affected == 0 {
            return Err(EngineError::NotFound {
                entity: "execution",
                id: execution.id,
            });
        }
        Ok(())
    }

    async fn update_nodes(&self, execution: &Execution) -> EngineResult<()> {
        let affected = ExecutionRepo::update_nodes(&self.pool, execution)
            .await
            .map_err(store_err)?;
        if affected == 0 {
            return Err(EngineError::NotFound {
                entity: "execution",
                id: execution.id,
            });
        }
        Ok(())
    }

    async fn find_by_id(&self, id: DbId) -> EngineResult<Execution> {
        ExecutionRepo::find_by_id(&self.pool, id)
            .await
            .map_err(store_err)?
            .ok_or(EngineError::NotFound {
                entity: "execution",
                id,
            })?
            .into_domain()
    }

    async fn find_by_user(&self, query: &ListExecutionsQuery) -> EngineResult<Vec<Execution>> {
        ExecutionRepo::list(&self.pool, query)
            .await
            .map_err(store_err)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect()
    }

    async fn count_by_user(&self, user_id: DbId) -> EngineResult<i64> {
        ExecutionRepo::count_by_user(&self.pool, user_id)
            .await
            .map_err(store_err)
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

pub struct PgTaskStore {
    pool: DbPool,
}

impl PgTaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, task: Task) -> EngineResult<Task> {
        let row = TaskRepo::insert(&self.pool, &task).await.map_err(store_err)?;
        row.into_domain()
    }

    async fn find_by_id(&self, id: DbId) -> EngineResult<Task> {
        TaskRepo::find_by_id(&self.pool, id)
            .await
            .map_err(store_err)?
            .ok_or(EngineError::NotFound { entity: "task", id })?
            .into_domain()
    }

    async fn update(&self, task: &Task) -> EngineResult<()> {
        let affected = TaskRepo::update(&self.pool, task).await.map_err(store_err)?;
        if affected == 0 {
            return Err(EngineError::NotFound {
                entity: "task",
                id: task.id,
            });
        }
        Ok(())
    }

    async fn find_pending(&self) -> EngineResult<Vec<Task>> {
        TaskRepo::find_pending(&self.pool)
            .await
            .map_err(store_err)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect()
    }

    async fn find_by_execution(&self, execution_id: DbId) -> EngineResult<Vec<Task>> {
        TaskRepo::find_by_execution(&self.pool, execution_id)
            .await
            .map_err(store_err)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

pub struct PgWorkerStore {
    pool: DbPool,
}

impl PgWorkerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerStore for PgWorkerStore {
    async fn create(&self, worker: Worker) -> EngineResult<Worker> {
        let row = WorkerRepo::insert(&self.pool, &worker)
            .await
            .map_err(store_err)?;
        row.into_domain()
    }

    async fn find_by_id(&self, id: DbId) -> EngineResult<Worker> {
        WorkerRepo::find_by_id(&self.pool, id)
            .await
            .map_err(store_err)?
            .ok_or(EngineError::NotFound {
                entity: "worker",
                id,
            })?
            .into_domain()
    }

    async fn update(&self, worker: &Worker) -> EngineResult<()> {
        let affected = WorkerRepo::update(&self.pool, worker)
            .await
            .map_err(store_err)?;
        if affected == 0 {
            return Err(EngineError::NotFound {
                entity: "worker",
                id: worker.id,
            });
        }
        Ok(())
    }

    async fn delete(&self, id: DbId) -> EngineResult<()> {
        let affected = WorkerRepo::delete(&self.pool, id).await.map_err(store_err)?;
        if affected == 0 {
            return Err(EngineError::NotFound {
                entity: "worker",
                id,
            });
        }
        Ok(())
    }

    async fn list(&self) -> EngineResult<Vec<Worker>> {
        WorkerRepo::list(&self.pool)
            .await
            .map_err(store_err)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect()
    }

    async fn find_available(&self) -> EngineResult<Vec<Worker>> {
        WorkerRepo::find_available(&self.pool)
            .await
            .map_err(store_err)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect()
    }
}
