//! In-memory store implementations.
//!
//! Used by the standalone (single-process) deployment and by the engine's
//! integration tests. Behavior mirrors the PostgreSQL adapters: ids are
//! assigned on create, "not found" is a distinguished error, listing is
//! newest-first with a clamped page size.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use flowd_core::error::{EngineError, EngineResult};
use flowd_core::execution::{Execution, ListExecutionsQuery};
use flowd_core::store::{Cache, ExecutionStore, TaskStore, WorkerStore};
use flowd_core::task::{Task, TaskStatus};
use flowd_core::types::DbId;
use flowd_core::worker::Worker;
use serde_json::Value;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryExecutionStore {
    rows: Mutex<HashMap<DbId, Execution>>,
    next_id: AtomicI64,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn save(&self, mut execution: Execution) -> EngineResult<Execution> {
        execution.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.rows).insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn update(&self, execution: &Execution) -> EngineResult<()> {
        let mut rows = lock(&self.rows);
        if !rows.contains_key(&execution.id) {
            return Err(EngineError::NotFound {
                entity: "execution",
                id: execution.id,
            });
        }
        rows.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_nodes(&self, execution: &Execution) -> EngineResult<()> {
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(&execution.id)
            .ok_or(EngineError::NotFound {
                entity: "execution",
                id: execution.id,
            })?;
        row.node_executions = execution.node_executions.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: DbId) -> EngineResult<Execution> {
        lock(&self.rows)
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound {
                entity: "execution",
                id,
            })
    }

    async fn find_by_user(&self, query: &ListExecutionsQuery) -> EngineResult<Vec<Execution>> {
        let limit = if query.limit <= 0 {
            DEFAULT_LIMIT
        } else {
            query.limit.min(MAX_LIMIT)
        };
        let offset = query.offset.max(0) as usize;

        let mut matches: Vec<Execution> = lock(&self.rows)
            .values()
            .filter(|e| e.user_id == query.user_id)
            .filter(|e| query.workflow_id.map_or(true, |w| e.workflow_id == w))
            .filter(|e| query.status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matches.into_iter().skip(offset).take(limit as usize).collect())
    }

    async fn count_by_user(&self, user_id: DbId) -> EngineResult<i64> {
        Ok(lock(&self.rows)
            .values()
            .filter(|e| e.user_id == user_id)
            .count() as i64)
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTaskStore {
    rows: Mutex<HashMap<DbId, Task>>,
    next_id: AtomicI64,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, mut task: Task) -> EngineResult<Task> {
        task.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.rows).insert(task.id, task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: DbId) -> EngineResult<Task> {
        lock(&self.rows)
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound { entity: "task", id })
    }

    async fn update(&self, task: &Task) -> EngineResult<()> {
        let mut rows = lock(&self.rows);
        if !rows.contains_key(&task.id) {
            return Err(EngineError::NotFound {
                entity: "task",
                id: task.id,
            });
        }
        rows.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_pending(&self) -> EngineResult<Vec<Task>> {
        let mut pending: Vec<Task> = lock(&self.rows)
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(pending)
    }

    async fn find_by_execution(&self, execution_id: DbId) -> EngineResult<Vec<Task>> {
        let mut tasks: Vec<Task> = lock(&self.rows)
            .values()
            .filter(|t| t.execution_id == execution_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryWorkerStore {
    rows: Mutex<HashMap<DbId, Worker>>,
    next_id: AtomicI64,
}

impl MemoryWorkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerStore for MemoryWorkerStore {
    async fn create(&self, mut worker: Worker) -> EngineResult<Worker> {
        worker.id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.rows).insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn find_by_id(&self, id: DbId) -> EngineResult<Worker> {
        lock(&self.rows)
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound {
                entity: "worker",
                id,
            })
    }

    async fn update(&self, worker: &Worker) -> EngineResult<()> {
        let mut rows = lock(&self.rows);
        if !rows.contains_key(&worker.id) {
            return Err(EngineError::NotFound {
                entity: "worker",
                id: worker.id,
            });
        }
        rows.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn delete(&self, id: DbId) -> EngineResult<()> {
        lock(&self.rows)
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::NotFound {
                entity: "worker",
                id,
            })
    }

    async fn list(&self) -> EngineResult<Vec<Worker>> {
        let mut workers: Vec<Worker> = lock(&self.rows).values().cloned().collect();
        workers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        Ok(workers)
    }

    async fn find_available(&self) -> EngineResult<Vec<Worker>> {
        let mut workers: Vec<Worker> = lock(&self.rows)
            .values()
            .filter(|w| w.is_eligible(&[]))
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        Ok(workers)
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// TTL cache over a plain map. Expired entries are dropped lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        lock(&self.entries).insert(key.to_string(), (value, Instant::now() + ttl));
    }

    async fn delete(&self, key: &str) {
        lock(&self.entries).remove(key);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use flowd_core::execution::{ExecutionStatus, TriggerType};
    use flowd_core::task::SubmitTaskInput;
    use flowd_core::worker::RegisterWorkerInput;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn save_assigns_sequential_ids() {
        let store = MemoryExecutionStore::new();
        let a = store
            .save(Execution::new(1, 1, 7, TriggerType::Manual, json!({})))
            .await
            .unwrap();
        let b = store
            .save(Execution::new(1, 1, 7, TriggerType::Manual, json!({})))
            .await
            .unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn update_nodes_leaves_status_alone() {
        use flowd_core::execution::NodeExecution;

        let store = MemoryExecutionStore::new();
        let mut execution = Execution::new(1, 1, 7, TriggerType::Manual, json!({}));
        execution.start().unwrap();
        let mut execution = store.save(execution).await.unwrap();

        // Pause lands in the store while the driver still holds a
        // running copy.
        let mut paused = execution.clone();
        paused.pause().unwrap();
        store.update(&paused).await.unwrap();

        execution.record_node(NodeExecution::new("a", "noop", json!({})));
        store.update_nodes(&execution).await.unwrap();

        let stored = store.find_by_id(execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Paused);
        assert!(stored.node_executions.contains_key("a"));
    }

    #[tokio::test]
    async fn find_missing_execution_is_not_found() {
        let store = MemoryExecutionStore::new();
        let err = store.find_by_id(42).await.unwrap_err();
        assert_matches!(err, EngineError::NotFound { entity: "execution", id: 42 });
    }

    #[tokio::test]
    async fn list_filters_by_user_and_status() {
        let store = MemoryExecutionStore::new();
        let mut running = Execution::new(1, 1, 7, TriggerType::Manual, json!({}));
        running.start().unwrap();
        store.save(running).await.unwrap();
        store
            .save(Execution::new(1, 1, 7, TriggerType::Manual, json!({})))
            .await
            .unwrap();
        store
            .save(Execution::new(1, 1, 8, TriggerType::Manual, json!({})))
            .await
            .unwrap();

        let page = store
            .find_by_user(&ListExecutionsQuery {
                user_id: 7,
                status: Some(ExecutionStatus::Running),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(store.count_by_user(7).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn pending_tasks_ordered_by_priority_then_age() {
        let store = MemoryTaskStore::new();
        for (priority, node) in [(0, "n1"), (10, "n2"), (-10, "n3")] {
            store
                .create(Task::from_input(SubmitTaskInput {
                    execution_id: 1,
                    node_id: node.into(),
                    task_type: "noop".into(),
                    priority: Some(priority),
                    input: json!({}),
                    max_retries: None,
                    tags: None,
                }))
                .await
                .unwrap();
        }
        let pending = store.find_pending().await.unwrap();
        let nodes: Vec<_> = pending.iter().map(|t| t.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["n2", "n1", "n3"]);
    }

    #[tokio::test]
    async fn worker_delete_then_find_is_not_found() {
        let store = MemoryWorkerStore::new();
        let worker = store
            .create(
                Worker::from_input(RegisterWorkerInput {
                    name: "w1".into(),
                    host: "h".into(),
                    port: 1,
                    capacity: 1,
                    tags: None,
                })
                .unwrap(),
            )
            .await
            .unwrap();
        store.delete(worker.id).await.unwrap();
        assert!(store.find_by_id(worker.id).await.is_err());
    }

    #[tokio::test]
    async fn cache_expires_entries() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), Duration::from_millis(10)).await;
        assert_eq!(cache.get("k").await, Some(json!(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await, None);
    }
}
