//! Execution lifecycle service: the engine's user-facing API surface.
//!
//! Owns the execution state machine from the outside: starting (async or
//! synchronous), reads (with a read-through cache for terminal
//! executions), listing, and the pause/resume/cancel controls. One
//! orchestration task drives each live execution; an active-set guard
//! makes sure resume never spawns a second driver for the same
//! execution.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use flowd_core::error::EngineResult;
use flowd_core::execution::{Execution, ListExecutionsQuery, StartExecutionCommand};
use flowd_core::graph::{WorkflowGraph, WorkflowResolver};
use flowd_core::store::{Cache, ExecutionStore};
use flowd_core::types::DbId;
use flowd_events::{event_types, EventBus, ExecutionEvent};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cancel::CancellationRegistry;
use crate::orchestrator::Orchestrator;

fn cache_key(execution_id: DbId) -> String {
    format!("execution:{execution_id}")
}

pub struct ExecutionService {
    executions: Arc<dyn ExecutionStore>,
    resolver: Arc<dyn WorkflowResolver>,
    orchestrator: Arc<Orchestrator>,
    events: Arc<EventBus>,
    cache: Arc<dyn Cache>,
    cancels: Arc<CancellationRegistry>,
    cache_ttl: Duration,
    /// Executions currently owned by a driver task.
    active: std::sync::Mutex<HashSet<DbId>>,
}

impl ExecutionService {
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        resolver: Arc<dyn WorkflowResolver>,
        orchestrator: Arc<Orchestrator>,
        events: Arc<EventBus>,
        cache: Arc<dyn Cache>,
        cancels: Arc<CancellationRegistry>,
        cache_ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            executions,
            resolver,
            orchestrator,
            events,
            cache,
            cancels,
            cache_ttl,
            active: std::sync::Mutex::new(HashSet::new()),
        })
    }

    // ── Starting ─────────────────────────────────────────────────────────

    /// Start an execution and return immediately with the pending record;
    /// a background task drives it to its terminal state.
    pub async fn start_execution(
        self: &Arc<Self>,
        command: StartExecutionCommand,
    ) -> EngineResult<Execution> {
        let (execution, graph) = self.prepare(command).await?;
        self.spawn_driver(execution.id, graph);
        Ok(execution)
    }

    /// Run a workflow synchronously: returns once the execution reached a
    /// terminal state. A failed node yields an `Ok` execution in the
    /// failed state, with the structured error on the record; only
    /// infrastructure problems are returned as errors.
    pub async fn execute_workflow(
        self: &Arc<Self>,
        command: StartExecutionCommand,
    ) -> EngineResult<Execution> {
        let (execution, graph) = self.prepare(command).await?;
        let execution_id = execution.id;
        if !self.claim(execution_id) {
            // Freshly created ids are never already claimed.
            return self.get_execution(execution_id).await;
        }
        let result = self.orchestrator.run(execution_id, graph).await;
        self.release(execution_id).await;
        result
    }

    /// Validate, persist, and announce a new execution.
    async fn prepare(
        &self,
        command: StartExecutionCommand,
    ) -> EngineResult<(Execution, WorkflowGraph)> {
        let graph = self.resolver.resolve(command.workflow_id).await?;
        graph.validate()?;

        let execution = Execution::new(
            graph.workflow_id,
            graph.version,
            command.user_id,
            command.trigger,
            command.input,
        );
        let execution = self.executions.save(execution).await?;
        self.cancels.register(execution.id);
        info!(
            execution_id = execution.id,
            workflow_id = execution.workflow_id,
            trigger = execution.trigger.as_str(),
            "execution accepted"
        );
        self.events.publish(
            ExecutionEvent::new(event_types::EXECUTION_STARTED, "execution", execution.id)
                .with_user(execution.user_id)
                .with_payload(json!({"workflow_id": execution.workflow_id})),
        );
        Ok((execution, graph))
    }

    fn spawn_driver(self: &Arc<Self>, execution_id: DbId, graph: WorkflowGraph) {
        if !self.claim(execution_id) {
            debug!(execution_id, "driver already active");
            return;
        }
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(err) = service.orchestrator.run(execution_id, graph).await {
                warn!(execution_id, error = %err, "orchestration aborted");
            }
            service.release(execution_id).await;
        });
    }

    fn claim(&self, execution_id: DbId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(execution_id)
    }

    /// Driver cleanup: free the active slot, and once the execution is
    /// terminal drop its cancellation token and any cached copy.
    async fn release(&self, execution_id: DbId) {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&execution_id);
        if let Ok(execution) = self.executions.find_by_id(execution_id).await {
            if execution.status.is_terminal() {
                self.cancels.remove(execution_id);
            }
        }
        self.cache.delete(&cache_key(execution_id)).await;
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Fetch one execution.
    ///
    /// Terminal executions are served through the cache (they are
    /// immutable); live ones always come from the store.
    pub async fn get_execution(&self, execution_id: DbId) -> EngineResult<Execution> {
        let key = cache_key(execution_id);
        if let Some(value) = self.cache.get(&key).await {
            if let Ok(execution) = serde_json::from_value::<Execution>(value) {
                debug!(execution_id, "execution served from cache");
                return Ok(execution);
            }
            // Unreadable entry; drop it and fall through to the store.
            self.cache.delete(&key).await;
        }

        let execution = self.executions.find_by_id(execution_id).await?;
        if execution.status.is_terminal() {
            if let Ok(value) = serde_json::to_value(&execution) {
                self.cache.set(&key, value, self.cache_ttl).await;
            }
        }
        Ok(execution)
    }

    pub async fn list_executions(
        &self,
        query: &ListExecutionsQuery,
    ) -> EngineResult<Vec<Execution>> {
        self.executions.find_by_user(query).await
    }

    pub async fn count_executions(&self, user_id: DbId) -> EngineResult<i64> {
        self.executions.count_by_user(user_id).await
    }

    // ── Controls ─────────────────────────────────────────────────────────

    /// Pause a running execution: no new node waves are dispatched;
    /// in-flight nodes run to completion.
    pub async fn pause_execution(&self, execution_id: DbId) -> EngineResult<Execution> {
        let mut execution = self.executions.find_by_id(execution_id).await?;
        execution.pause()?;
        self.executions.update(&execution).await?;
        self.cache.delete(&cache_key(execution_id)).await;
        info!(execution_id, "execution paused");
        Ok(execution)
    }

    /// Resume a paused execution. If its driver is gone (process
    /// restart), a new one is spawned; an existing driver just observes
    /// the status change.
    pub async fn resume_execution(self: &Arc<Self>, execution_id: DbId) -> EngineResult<Execution> {
        let mut execution = self.executions.find_by_id(execution_id).await?;
        execution.resume()?;
        self.executions.update(&execution).await?;
        self.cache.delete(&cache_key(execution_id)).await;
        self.cancels.register(execution_id);

        let graph = self.resolver.resolve(execution.workflow_id).await?;
        self.spawn_driver(execution_id, graph);
        info!(execution_id, "execution resumed");
        Ok(execution)
    }

    /// Cancel a running or paused execution. The per-execution
    /// cancellation token fires so in-flight sandboxed work is
    /// interrupted cooperatively.
    pub async fn cancel_execution(&self, execution_id: DbId) -> EngineResult<Execution> {
        let mut execution = self.executions.find_by_id(execution_id).await?;
        execution.cancel()?;
        self.executions.update(&execution).await?;
        self.cancels.cancel(execution_id);
        self.cache.delete(&cache_key(execution_id)).await;
        info!(execution_id, "execution cancelled");
        self.events.publish(
            ExecutionEvent::new(event_types::EXECUTION_CANCELLED, "execution", execution_id)
                .with_user(execution.user_id),
        );
        Ok(execution)
    }
}
