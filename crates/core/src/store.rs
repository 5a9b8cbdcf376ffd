//! Collaborator traits the engine is wired against.
//!
//! Persistence is an external collaborator reached through these narrow
//! seams; the engine never talks to a database driver directly. "Not
//! found" is a distinguished error kind ([`EngineError::NotFound`]).
//! The cache is an optimization only — correctness never depends on it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineResult;
use crate::execution::{Execution, ListExecutionsQuery};
use crate::task::Task;
use crate::types::DbId;
use crate::worker::Worker;

/// Durable store for executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a new execution, returning it with its assigned id.
    async fn save(&self, execution: Execution) -> EngineResult<Execution>;
    /// Overwrite an existing execution.
    async fn update(&self, execution: &Execution) -> EngineResult<()>;
    /// Persist only the node records of an execution.
    ///
    /// Status and the control timestamps are left untouched, so a driver
    /// checkpointing node progress can never overwrite a pause, resume,
    /// or cancel committed concurrently through [`update`](Self::update).
    async fn update_nodes(&self, execution: &Execution) -> EngineResult<()>;
    async fn find_by_id(&self, id: DbId) -> EngineResult<Execution>;
    async fn find_by_user(&self, query: &ListExecutionsQuery) -> EngineResult<Vec<Execution>>;
    async fn count_by_user(&self, user_id: DbId) -> EngineResult<i64>;
}

/// Durable store for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task, returning it with its assigned id.
    async fn create(&self, task: Task) -> EngineResult<Task>;
    async fn find_by_id(&self, id: DbId) -> EngineResult<Task>;
    async fn update(&self, task: &Task) -> EngineResult<()>;
    async fn find_pending(&self) -> EngineResult<Vec<Task>>;
    async fn find_by_execution(&self, execution_id: DbId) -> EngineResult<Vec<Task>>;
}

/// Durable store for the worker registry.
#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Persist a new worker, returning it with its assigned id.
    async fn create(&self, worker: Worker) -> EngineResult<Worker>;
    async fn find_by_id(&self, id: DbId) -> EngineResult<Worker>;
    async fn update(&self, worker: &Worker) -> EngineResult<()>;
    async fn delete(&self, id: DbId) -> EngineResult<()>;
    async fn list(&self) -> EngineResult<Vec<Worker>>;
    /// Workers currently able to accept work (not offline, spare capacity).
    async fn find_available(&self) -> EngineResult<Vec<Worker>>;
}

/// Read-through cache collaborator.
///
/// Failures must be swallowed by callers (logged, never propagated) and a
/// `get` miss simply falls back to the store.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Duration);
    async fn delete(&self, key: &str);
}
