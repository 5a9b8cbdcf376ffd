//! Hand-off seam between the scheduler and whatever actually runs a task.
//!
//! The scheduler decides *which* worker gets a task; a [`TaskDispatcher`]
//! decides *how* the task reaches it. The in-process deployment uses
//! [`LocalDispatcher`], which feeds the shared [`WorkerPool`] directly —
//! a remote transport would implement the same trait.

use std::sync::Arc;

use async_trait::async_trait;
use flowd_core::error::EngineResult;
use flowd_core::task::Task;
use flowd_core::worker::Worker;
use flowd_sandbox::request::{Constraints, NodeExecutionRequest};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::CancellationRegistry;
use crate::worker_pool::{WorkItem, WorkerPool};

/// Delivers a dispatched task to its assigned worker.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Hand `task` to `worker`. An error means the task never started and
    /// the scheduler must roll the dispatch back.
    async fn dispatch(&self, worker: &Worker, task: &Task) -> EngineResult<()>;
}

/// Dispatcher for the single-process deployment: every logical worker is
/// backed by the same in-process [`WorkerPool`].
pub struct LocalDispatcher {
    pool: Arc<WorkerPool>,
    cancels: Arc<CancellationRegistry>,
    default_timeout_ms: u64,
}

impl LocalDispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        cancels: Arc<CancellationRegistry>,
        default_timeout_ms: u64,
    ) -> Self {
        Self {
            pool,
            cancels,
            default_timeout_ms,
        }
    }
}

#[async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn dispatch(&self, worker: &Worker, task: &Task) -> EngineResult<()> {
        // The task id is the correlation id: results coming off the pool
        // are matched back to their task by it.
        let request = NodeExecutionRequest::new(task.task_type.clone(), task.input.clone())
            .with_id(task.id.to_string())
            .with_constraints(Constraints {
                timeout_ms: self.default_timeout_ms,
                ..Constraints::default()
            });
        let cancel = self
            .cancels
            .get(task.execution_id)
            .unwrap_or_else(CancellationToken::new);

        self.pool.submit(WorkItem::new(request, cancel))?;
        debug!(task_id = task.id, worker_id = worker.id, "task handed to worker pool");
        Ok(())
    }
}
