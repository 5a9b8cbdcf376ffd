//! Cluster scheduler: worker registry, bounded task queue, dispatch and
//! health loops.
//!
//! All registry and queue mutations happen under one lock, so a capacity
//! slot can never be taken or released twice for the same dispatch.
//! Dispatch is deliberately dependency-agnostic: every queued task is
//! treated as independently runnable, and ordering between dependent
//! nodes is the orchestrator's job.
//!
//! Worker selection is deterministic: eligible workers (not offline,
//! spare capacity, all required tags) ranked by `(current_load,
//! registered_at, id)`. `Offline` is sticky — only a fresh heartbeat
//! from the worker itself clears it, never a slot release.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowd_core::error::{EngineError, EngineResult};
use flowd_core::execution::ExecutionError;
use flowd_core::selection::select_worker;
use flowd_core::store::{TaskStore, WorkerStore};
use flowd_core::task::{FailOutcome, SubmitTaskInput, Task, TaskStatus};
use flowd_core::types::DbId;
use flowd_core::worker::{validate_tags, HeartbeatInput, RegisterWorkerInput, Worker};
use flowd_events::{event_types, EventBus, ExecutionEvent};
use flowd_sandbox::request::{NodeExecutionResult, SandboxStatus};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dispatch::TaskDispatcher;

/// Queue entry: enough to pick the next task without a store read.
struct QueuedTask {
    id: DbId,
    execution_id: DbId,
    priority: i32,
}

/// Registry and queue, guarded together.
struct SchedulerState {
    workers: HashMap<DbId, Worker>,
    queue: VecDeque<QueuedTask>,
}

/// The cluster scheduler.
pub struct ExecutorService {
    state: Mutex<SchedulerState>,
    tasks: Arc<dyn TaskStore>,
    workers: Arc<dyn WorkerStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    events: Arc<EventBus>,
    /// Signalled whenever capacity is released or work arrives.
    work_available: Notify,
    queue_capacity: usize,
    dispatch_backoff: Duration,
    offline_threshold: Duration,
    health_check_interval: Duration,
    shutdown: CancellationToken,
    loops: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutorService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        workers: Arc<dyn WorkerStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        events: Arc<EventBus>,
        config: &EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                workers: HashMap::new(),
                queue: VecDeque::new(),
            }),
            tasks,
            workers,
            dispatcher,
            events,
            work_available: Notify::new(),
            queue_capacity: config.queue_capacity.max(1),
            dispatch_backoff: config.dispatch_backoff,
            offline_threshold: config.offline_threshold,
            health_check_interval: config.health_check_interval,
            shutdown: CancellationToken::new(),
            loops: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Recover persisted state and start the dispatch and health loops.
    ///
    /// Workers registered before a restart come back into the registry;
    /// tasks that were pending go back on the queue in store order.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        {
            let mut state = self.state.lock().await;
            for worker in self.workers.list().await? {
                state.workers.insert(worker.id, worker);
            }
            for task in self.tasks.find_pending().await? {
                state.queue.push_back(QueuedTask {
                    id: task.id,
                    execution_id: task.execution_id,
                    priority: task.priority,
                });
            }
            info!(
                workers = state.workers.len(),
                queued = state.queue.len(),
                "scheduler state recovered"
            );
        }

        let mut loops = self
            .loops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loops.push(tokio::spawn(self.clone().dispatch_loop()));
        loops.push(tokio::spawn(self.clone().health_loop()));
        Ok(())
    }

    /// Stop the loops. In-flight work is left to the worker pool to drain.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.work_available.notify_waiters();
        let handles: Vec<_> = self
            .loops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "scheduler loop panicked");
            }
        }
    }

    // ── Worker registry ──────────────────────────────────────────────────

    /// Register a worker: validated, persisted, then visible to dispatch.
    pub async fn register_worker(&self, input: RegisterWorkerInput) -> EngineResult<Worker> {
        let worker = Worker::from_input(input)?;
        let worker = self.workers.create(worker).await?;
        self.state
            .lock()
            .await
            .workers
            .insert(worker.id, worker.clone());
        info!(worker_id = worker.id, name = %worker.name, capacity = worker.capacity, "worker registered");
        self.work_available.notify_one();
        Ok(worker)
    }

    /// Apply a heartbeat. This is the only path that clears `Offline`.
    pub async fn heartbeat(&self, input: HeartbeatInput) -> EngineResult<Worker> {
        let mut state = self.state.lock().await;
        if !state.workers.contains_key(&input.worker_id) {
            // Registry lost it (restart); fall back to the store.
            let worker = self.workers.find_by_id(input.worker_id).await?;
            state.workers.insert(input.worker_id, worker);
        }
        let worker = state
            .workers
            .get_mut(&input.worker_id)
            .ok_or(EngineError::NotFound {
                entity: "worker",
                id: input.worker_id,
            })?;
        worker.apply_heartbeat(input.status, input.current_load);
        let snapshot = worker.clone();
        drop(state);

        self.workers.update(&snapshot).await?;
        self.work_available.notify_one();
        Ok(snapshot)
    }

    /// Remove a worker from the registry and the store.
    pub async fn unregister_worker(&self, worker_id: DbId) -> EngineResult<()> {
        self.state.lock().await.workers.remove(&worker_id);
        self.workers.delete(worker_id).await?;
        info!(worker_id, "worker unregistered");
        Ok(())
    }

    /// Current registry snapshot, in deterministic selection order.
    pub async fn workers_snapshot(&self) -> Vec<Worker> {
        let state = self.state.lock().await;
        let mut workers: Vec<Worker> = state.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        workers
    }

    pub async fn queue_depth(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    // ── Task lifecycle ───────────────────────────────────────────────────

    /// Accept a task onto the bounded queue.
    ///
    /// A full queue is an immediate [`EngineError::CapacityExceeded`];
    /// the scheduler never blocks a submitter.
    pub async fn submit_task(&self, input: SubmitTaskInput) -> EngineResult<Task> {
        let task = Task::from_input(input);
        validate_tags(&task.tags)?;

        let mut state = self.state.lock().await;
        if state.queue.len() >= self.queue_capacity {
            return Err(EngineError::CapacityExceeded(format!(
                "task queue is full ({} entries)",
                self.queue_capacity
            )));
        }
        let task = self.tasks.create(task).await?;
        state.queue.push_back(QueuedTask {
            id: task.id,
            execution_id: task.execution_id,
            priority: task.priority,
        });
        drop(state);

        debug!(task_id = task.id, node_id = %task.node_id, "task queued");
        self.work_available.notify_one();
        Ok(task)
    }

    /// Record a task's successful result and free its worker slot.
    ///
    /// Idempotent: completing an already-completed task is a no-op and
    /// releases nothing a second time.
    pub async fn complete_task(&self, task_id: DbId, output: Value) -> EngineResult<Task> {
        let mut state = self.state.lock().await;
        let mut task = self.tasks.find_by_id(task_id).await?;
        if task.status == TaskStatus::Completed {
            return Ok(task);
        }
        if task.status != TaskStatus::Running {
            return Err(EngineError::InvalidTransition {
                entity: "task",
                from: task.status.as_str(),
                to: "completed",
            });
        }

        let worker_id = task.worker_id;
        task.complete(output);
        self.tasks.update(&task).await?;
        self.release_worker(&mut state, worker_id).await;
        drop(state);

        self.work_available.notify_one();
        Ok(task)
    }

    /// Record a failed attempt: requeue below `max_retries`, terminal
    /// failure (with a `task.failed` event) once exhausted. The worker
    /// slot is released exactly once either way.
    pub async fn fail_task(&self, task_id: DbId, error: ExecutionError) -> EngineResult<Task> {
        let mut state = self.state.lock().await;
        let mut task = self.tasks.find_by_id(task_id).await?;
        if task.status.is_terminal() {
            return Ok(task);
        }

        let worker_id = task.worker_id;
        let outcome = task.fail_attempt(error.clone());
        self.tasks.update(&task).await?;
        self.release_worker(&mut state, worker_id).await;

        match outcome {
            FailOutcome::Requeued => {
                debug!(task_id, retries = task.retries, "task requeued after failure");
                state.queue.push_back(QueuedTask {
                    id: task.id,
                    execution_id: task.execution_id,
                    priority: task.priority,
                });
            }
            FailOutcome::Exhausted => {
                warn!(task_id, node_id = %task.node_id, "task exhausted its retries");
                self.events.publish(
                    ExecutionEvent::new(event_types::TASK_FAILED, "task", task.id).with_payload(
                        json!({
                            "execution_id": task.execution_id,
                            "node_id": task.node_id,
                            "error": error,
                        }),
                    ),
                );
            }
        }
        drop(state);

        self.work_available.notify_one();
        Ok(task)
    }

    /// Terminally fail a task without burning retries. Used when the
    /// parent execution was cancelled and re-running is pointless.
    pub async fn abort_task(&self, task_id: DbId, error: ExecutionError) -> EngineResult<Task> {
        let mut state = self.state.lock().await;
        let mut task = self.tasks.find_by_id(task_id).await?;
        if task.status.is_terminal() {
            return Ok(task);
        }

        let worker_id = task.worker_id;
        task.status = TaskStatus::Failed;
        task.error = Some(error);
        task.completed_at = Some(Utc::now());
        self.tasks.update(&task).await?;
        self.release_worker(&mut state, worker_id).await;
        drop(state);

        self.work_available.notify_one();
        Ok(task)
    }

    /// Drop an execution's queued tasks and terminally fail them without
    /// burning retries. In-flight tasks are left to the cancellation
    /// token; this only covers work that never reached a worker. Returns
    /// how many tasks were purged.
    pub async fn purge_execution(&self, execution_id: DbId) -> EngineResult<usize> {
        let purged: Vec<DbId> = {
            let mut state = self.state.lock().await;
            let mut purged = Vec::new();
            state.queue.retain(|queued| {
                if queued.execution_id == execution_id {
                    purged.push(queued.id);
                    false
                } else {
                    true
                }
            });
            purged
        };
        for task_id in &purged {
            let error = ExecutionError::new("cancelled", "execution cancelled before dispatch");
            if let Err(err) = self.abort_task(*task_id, error).await {
                warn!(task_id = *task_id, error = %err, "could not abort queued task");
            }
        }
        if !purged.is_empty() {
            debug!(execution_id, purged = purged.len(), "queued tasks purged");
        }
        Ok(purged.len())
    }

    // ── Result stream ────────────────────────────────────────────────────

    /// Consume a worker pool's result stream, feeding each result back
    /// into the task lifecycle. The handle finishes when the stream
    /// closes.
    pub fn consume_results(
        self: &Arc<Self>,
        mut results: mpsc::Receiver<NodeExecutionResult>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                scheduler.apply_result(result).await;
            }
            debug!("result stream closed");
        })
    }

    async fn apply_result(&self, result: NodeExecutionResult) {
        let task_id: DbId = match result.request_id.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(request_id = %result.request_id, "result with non-task correlation id");
                return;
            }
        };
        let message = result
            .error
            .unwrap_or_else(|| "node execution failed".to_string());
        let applied = match result.status {
            SandboxStatus::Completed => {
                self.complete_task(task_id, result.output.unwrap_or(Value::Null))
                    .await
            }
            SandboxStatus::Failed => {
                self.fail_task(task_id, ExecutionError::new("node_failed", message))
                    .await
            }
            SandboxStatus::TimedOut => {
                self.fail_task(task_id, ExecutionError::new("timeout", message))
                    .await
            }
            // A cancelled run never retries.
            SandboxStatus::Cancelled => {
                self.abort_task(task_id, ExecutionError::new("cancelled", message))
                    .await
            }
        };
        if let Err(err) = applied {
            warn!(task_id, error = %err, "could not apply task result");
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let dispatched = match self.dispatch_next().await {
                Ok(dispatched) => dispatched,
                Err(err) => {
                    warn!(error = %err, "dispatch attempt failed");
                    false
                }
            };
            if dispatched {
                continue;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.work_available.notified() => {}
                _ = tokio::time::sleep(self.dispatch_backoff) => {}
            }
        }
        debug!("dispatch loop exiting");
    }

    /// Try to dispatch one task. `Ok(true)` means progress was made and
    /// another attempt should follow immediately.
    async fn dispatch_next(&self) -> EngineResult<bool> {
        let mut state = self.state.lock().await;
        let Some(queued) = take_next(&mut state.queue) else {
            return Ok(false);
        };

        let mut task = match self.tasks.find_by_id(queued.id).await {
            Ok(task) => task,
            Err(EngineError::NotFound { .. }) => return Ok(true),
            Err(err) => {
                state.queue.push_front(queued);
                return Err(err);
            }
        };
        if task.status != TaskStatus::Pending {
            // Stale queue entry (completed or aborted while queued).
            return Ok(true);
        }

        let Some(worker_id) = select_worker(state.workers.values(), &task.tags) else {
            state.queue.push_front(queued);
            return Ok(false);
        };
        let Some(worker) = state.workers.get_mut(&worker_id) else {
            state.queue.push_front(queued);
            return Ok(false);
        };
        worker.take_slot();
        let snapshot = worker.clone();
        task.dispatch_to(worker_id);

        if let Err(err) = self.persist_dispatch(&snapshot, &task).await {
            self.rollback_dispatch(&mut state, queued, &mut task, worker_id)
                .await;
            return Err(err);
        }
        if let Err(err) = self.dispatcher.dispatch(&snapshot, &task).await {
            warn!(task_id = task.id, worker_id, error = %err, "dispatch hand-off failed, rolling back");
            self.rollback_dispatch(&mut state, queued, &mut task, worker_id)
                .await;
            return Ok(false);
        }

        debug!(task_id = task.id, worker_id, "task dispatched");
        Ok(true)
    }

    async fn persist_dispatch(&self, worker: &Worker, task: &Task) -> EngineResult<()> {
        self.tasks.update(task).await?;
        self.workers.update(worker).await?;
        Ok(())
    }

    /// Undo a reserved dispatch: slot back, task back to pending, entry
    /// back at the queue front.
    async fn rollback_dispatch(
        &self,
        state: &mut SchedulerState,
        queued: QueuedTask,
        task: &mut Task,
        worker_id: DbId,
    ) {
        if let Some(worker) = state.workers.get_mut(&worker_id) {
            worker.release_slot();
            let snapshot = worker.clone();
            if let Err(err) = self.workers.update(&snapshot).await {
                warn!(worker_id, error = %err, "could not persist dispatch rollback");
            }
        }
        task.status = TaskStatus::Pending;
        task.worker_id = None;
        task.started_at = None;
        if let Err(err) = self.tasks.update(task).await {
            warn!(task_id = task.id, error = %err, "could not persist task rollback");
        }
        state.queue.push_front(queued);
    }

    /// Release one slot on `worker_id`, if it is still registered.
    /// Never resurrects an offline worker.
    async fn release_worker(&self, state: &mut SchedulerState, worker_id: Option<DbId>) {
        let Some(worker_id) = worker_id else {
            return;
        };
        let Some(worker) = state.workers.get_mut(&worker_id) else {
            return;
        };
        worker.release_slot();
        let snapshot = worker.clone();
        if let Err(err) = self.workers.update(&snapshot).await {
            warn!(worker_id, error = %err, "could not persist slot release");
        }
    }

    // ── Health ───────────────────────────────────────────────────────────

    async fn health_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.health_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh start
        // never demotes anyone.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.check_worker_health().await {
                warn!(error = %err, "worker health check failed");
            }
        }
        debug!("health loop exiting");
    }

    /// One health-check pass: demote every worker whose last heartbeat is
    /// older than the offline threshold. Returns how many were demoted.
    pub async fn check_worker_health(&self) -> EngineResult<usize> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let threshold_secs = self.offline_threshold.as_secs();
        let stale: Vec<DbId> = state
            .workers
            .values()
            .filter(|w| w.status != flowd_core::worker::WorkerStatus::Offline)
            .filter(|w| w.is_stale(now, threshold_secs))
            .map(|w| w.id)
            .collect();

        let mut demoted = 0;
        for worker_id in stale {
            let Some(worker) = state.workers.get_mut(&worker_id) else {
                continue;
            };
            worker.mark_offline();
            let snapshot = worker.clone();
            warn!(worker_id, name = %snapshot.name, "worker missed heartbeats, marked offline");
            if let Err(err) = self.workers.update(&snapshot).await {
                warn!(worker_id, error = %err, "could not persist offline demotion");
            }
            self.events.publish(
                ExecutionEvent::new(event_types::WORKER_OFFLINE, "worker", worker_id)
                    .with_payload(json!({"name": snapshot.name})),
            );
            demoted += 1;
        }
        Ok(demoted)
    }
}

/// Pop the highest-priority entry, FIFO within a priority.
fn take_next(queue: &mut VecDeque<QueuedTask>) -> Option<QueuedTask> {
    let best = queue
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.priority.cmp(&b.priority).then(ib.cmp(ia)))?
        .0;
    queue.remove(best)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use flowd_core::worker::WorkerStatus;
    use serde_json::json;

    use super::*;
    use crate::memory::{MemoryTaskStore, MemoryWorkerStore};

    /// Dispatcher that records hand-offs and can be told to reject them.
    #[derive(Default)]
    struct RecordingDispatcher {
        reject: std::sync::atomic::AtomicBool,
        handed: std::sync::Mutex<Vec<(DbId, DbId)>>,
    }

    #[async_trait::async_trait]
    impl TaskDispatcher for RecordingDispatcher {
        async fn dispatch(&self, worker: &Worker, task: &Task) -> EngineResult<()> {
            if self.reject.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(EngineError::CapacityExceeded("rejected".into()));
            }
            self.handed
                .lock()
                .unwrap()
                .push((task.id, worker.id));
            Ok(())
        }
    }

    struct Harness {
        scheduler: Arc<ExecutorService>,
        dispatcher: Arc<RecordingDispatcher>,
        events: Arc<EventBus>,
    }

    fn harness(queue_capacity: usize) -> Harness {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let events = Arc::new(EventBus::default());
        let config = EngineConfig {
            queue_capacity,
            ..EngineConfig::default()
        };
        let scheduler = ExecutorService::new(
            Arc::new(MemoryTaskStore::new()),
            Arc::new(MemoryWorkerStore::new()),
            dispatcher.clone(),
            events.clone(),
            &config,
        );
        Harness {
            scheduler,
            dispatcher,
            events,
        }
    }

    fn register(name: &str, capacity: u32, tags: &[&str]) -> RegisterWorkerInput {
        RegisterWorkerInput {
            name: name.into(),
            host: "127.0.0.1".into(),
            port: 9000,
            capacity,
            tags: Some(tags.iter().map(|t| t.to_string()).collect()),
        }
    }

    fn submit(node: &str, tags: &[&str], max_retries: u32) -> SubmitTaskInput {
        SubmitTaskInput {
            execution_id: 1,
            node_id: node.into(),
            task_type: "noop".into(),
            priority: None,
            input: json!({}),
            max_retries: Some(max_retries),
            tags: Some(tags.iter().map(|t| t.to_string()).collect()),
        }
    }

    #[tokio::test]
    async fn dispatch_picks_least_loaded_worker_and_reserves_a_slot() {
        let h = harness(16);
        let busy = h.scheduler.register_worker(register("w1", 2, &[])).await.unwrap();
        let idle = h.scheduler.register_worker(register("w2", 2, &[])).await.unwrap();
        h.scheduler
            .heartbeat(HeartbeatInput {
                worker_id: busy.id,
                status: WorkerStatus::Idle,
                current_load: 1,
            })
            .await
            .unwrap();

        h.scheduler.submit_task(submit("n1", &[], 0)).await.unwrap();
        assert!(h.scheduler.dispatch_next().await.unwrap());

        let handed = h.dispatcher.handed.lock().unwrap().clone();
        assert_eq!(handed.len(), 1);
        assert_eq!(handed[0].1, idle.id);

        let workers = h.scheduler.workers_snapshot().await;
        let dispatched_to = workers.iter().find(|w| w.id == idle.id).unwrap();
        assert_eq!(dispatched_to.current_load, 1);
    }

    #[tokio::test]
    async fn tag_mismatch_leaves_task_queued() {
        let h = harness(16);
        h.scheduler.register_worker(register("w1", 1, &["cpu"])).await.unwrap();
        h.scheduler
            .submit_task(submit("n1", &["gpu"], 0))
            .await
            .unwrap();

        assert!(!h.scheduler.dispatch_next().await.unwrap());
        assert_eq!(h.scheduler.queue_depth().await, 1);
        assert!(h.dispatcher.handed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_queue_rejects_submission() {
        let h = harness(1);
        h.scheduler.submit_task(submit("n1", &[], 0)).await.unwrap();
        let err = h.scheduler.submit_task(submit("n2", &[], 0)).await.unwrap_err();
        assert_matches!(err, EngineError::CapacityExceeded(_));
    }

    #[tokio::test]
    async fn higher_priority_tasks_dispatch_first() {
        let h = harness(16);
        h.scheduler.register_worker(register("w1", 8, &[])).await.unwrap();
        let mut background = submit("bg", &[], 0);
        background.priority = Some(flowd_core::task::PRIORITY_BACKGROUND);
        let mut urgent = submit("urgent", &[], 0);
        urgent.priority = Some(flowd_core::task::PRIORITY_URGENT);

        h.scheduler.submit_task(background).await.unwrap();
        let urgent_task = h.scheduler.submit_task(urgent).await.unwrap();

        assert!(h.scheduler.dispatch_next().await.unwrap());
        let handed = h.dispatcher.handed.lock().unwrap().clone();
        assert_eq!(handed[0].0, urgent_task.id);
    }

    #[tokio::test]
    async fn complete_releases_exactly_one_slot() {
        let h = harness(16);
        let worker = h.scheduler.register_worker(register("w1", 1, &[])).await.unwrap();
        let task = h.scheduler.submit_task(submit("n1", &[], 0)).await.unwrap();
        assert!(h.scheduler.dispatch_next().await.unwrap());

        let done = h.scheduler.complete_task(task.id, json!({"ok": true})).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        // Second completion is a no-op: no double release.
        h.scheduler.complete_task(task.id, json!({"ok": true})).await.unwrap();
        let workers = h.scheduler.workers_snapshot().await;
        assert_eq!(workers[0].current_load, 0);
        assert_eq!(workers[0].id, worker.id);
    }

    #[tokio::test]
    async fn completing_a_pending_task_is_rejected() {
        let h = harness(16);
        let task = h.scheduler.submit_task(submit("n1", &[], 0)).await.unwrap();
        let err = h.scheduler.complete_task(task.id, json!(null)).await.unwrap_err();
        assert_matches!(err, EngineError::InvalidTransition { entity: "task", .. });
    }

    #[tokio::test]
    async fn failed_task_requeues_until_retries_exhaust_then_emits_event() {
        let h = harness(16);
        h.scheduler.register_worker(register("w1", 1, &[])).await.unwrap();
        let task = h.scheduler.submit_task(submit("n1", &[], 1)).await.unwrap();
        let mut events = h.events.subscribe();

        // Attempt 1: fails, goes back on the queue.
        assert!(h.scheduler.dispatch_next().await.unwrap());
        let failed = h
            .scheduler
            .fail_task(task.id, ExecutionError::new("node_failed", "boom"))
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Pending);
        assert_eq!(failed.retries, 1);
        assert_eq!(h.scheduler.queue_depth().await, 1);

        // Attempt 2: exhausts.
        assert!(h.scheduler.dispatch_next().await.unwrap());
        let failed = h
            .scheduler
            .fail_task(task.id, ExecutionError::new("node_failed", "boom"))
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retries, 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, event_types::TASK_FAILED);
        assert_eq!(event.aggregate_id, task.id);

        // Slot came back both times.
        let workers = h.scheduler.workers_snapshot().await;
        assert_eq!(workers[0].current_load, 0);
    }

    #[tokio::test]
    async fn rejected_hand_off_rolls_the_dispatch_back() {
        let h = harness(16);
        h.scheduler.register_worker(register("w1", 1, &[])).await.unwrap();
        let task = h.scheduler.submit_task(submit("n1", &[], 3)).await.unwrap();

        h.dispatcher
            .reject
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(!h.scheduler.dispatch_next().await.unwrap());

        // Slot free, task pending with no retry burned, still queued.
        let workers = h.scheduler.workers_snapshot().await;
        assert_eq!(workers[0].current_load, 0);
        assert_eq!(h.scheduler.queue_depth().await, 1);
        let task = h.scheduler.tasks.find_by_id(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retries, 0);
    }

    #[tokio::test]
    async fn stale_worker_goes_offline_and_stays_offline_on_release() {
        let h = harness(16);
        let worker = h.scheduler.register_worker(register("w1", 1, &[])).await.unwrap();
        let task = h.scheduler.submit_task(submit("n1", &[], 0)).await.unwrap();
        assert!(h.scheduler.dispatch_next().await.unwrap());

        // Age the heartbeat past the threshold.
        {
            let mut state = h.scheduler.state.lock().await;
            let w = state.workers.get_mut(&worker.id).unwrap();
            w.last_heartbeat = Utc::now() - chrono::Duration::seconds(3600);
        }
        let mut events = h.events.subscribe();
        assert_eq!(h.scheduler.check_worker_health().await.unwrap(), 1);
        assert_eq!(
            events.recv().await.unwrap().event_type,
            event_types::WORKER_OFFLINE
        );

        // Releasing the in-flight slot must not resurrect it.
        h.scheduler.complete_task(task.id, json!(null)).await.unwrap();
        let workers = h.scheduler.workers_snapshot().await;
        assert_eq!(workers[0].status, WorkerStatus::Offline);
        assert_eq!(workers[0].current_load, 0);

        // A fresh heartbeat does.
        let revived = h
            .scheduler
            .heartbeat(HeartbeatInput {
                worker_id: worker.id,
                status: WorkerStatus::Idle,
                current_load: 0,
            })
            .await
            .unwrap();
        assert_eq!(revived.status, WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn cancelled_result_aborts_without_retry() {
        let h = harness(16);
        h.scheduler.register_worker(register("w1", 1, &[])).await.unwrap();
        let task = h.scheduler.submit_task(submit("n1", &[], 3)).await.unwrap();
        assert!(h.scheduler.dispatch_next().await.unwrap());

        h.scheduler
            .apply_result(NodeExecutionResult::cancelled(task.id.to_string(), 5))
            .await;

        let task = h.scheduler.tasks.find_by_id(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retries, 0);
        assert_eq!(task.error.as_ref().unwrap().code, "cancelled");
        assert_eq!(h.scheduler.queue_depth().await, 0);
    }

    #[tokio::test]
    async fn purge_drops_only_the_targeted_executions_queued_tasks() {
        let h = harness(16);
        let doomed = h.scheduler.submit_task(submit("n1", &[], 3)).await.unwrap();
        let mut other = submit("n2", &[], 3);
        other.execution_id = 2;
        let survivor = h.scheduler.submit_task(other).await.unwrap();

        assert_eq!(h.scheduler.purge_execution(1).await.unwrap(), 1);

        let doomed = h.scheduler.tasks.find_by_id(doomed.id).await.unwrap();
        assert_eq!(doomed.status, TaskStatus::Failed);
        assert_eq!(doomed.retries, 0);
        assert_eq!(doomed.error.as_ref().unwrap().code, "cancelled");

        let survivor = h.scheduler.tasks.find_by_id(survivor.id).await.unwrap();
        assert_eq!(survivor.status, TaskStatus::Pending);
        assert_eq!(h.scheduler.queue_depth().await, 1);
    }
}
