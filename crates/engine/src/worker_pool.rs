//! Intra-process dispatcher: bounded work queue, runner loops, bounded
//! result stream.
//!
//! `submit` never blocks: a full queue is reported as
//! [`EngineError::CapacityExceeded`] so callers shed load instead of
//! stacking up. Each runner borrows a sandbox from the shared
//! [`SandboxPool`] for exactly one request and returns it afterwards.
//! Sandboxes never fail the channel: infrastructure problems surface as
//! failed [`NodeExecutionResult`]s with the request's correlation id, so
//! no submitted item ever goes unanswered.

use std::sync::Arc;

use flowd_core::error::{EngineError, EngineResult};
use flowd_sandbox::pool::SandboxPool;
use flowd_sandbox::request::{NodeExecutionRequest, NodeExecutionResult};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One queued unit of work: the request plus the cancellation token of
/// its parent execution.
pub struct WorkItem {
    pub request: NodeExecutionRequest,
    pub cancel: CancellationToken,
}

impl WorkItem {
    pub fn new(request: NodeExecutionRequest, cancel: CancellationToken) -> Self {
        Self { request, cancel }
    }
}

/// Fixed set of runner loops draining a bounded queue through a sandbox
/// pool.
pub struct WorkerPool {
    tx: std::sync::Mutex<Option<mpsc::Sender<WorkItem>>>,
    results: std::sync::Mutex<Option<mpsc::Receiver<NodeExecutionResult>>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `runner_count` runner loops over `sandboxes`.
    pub fn start(
        sandboxes: Arc<SandboxPool>,
        runner_count: usize,
        queue_capacity: usize,
        result_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<WorkItem>(queue_capacity.max(1));
        let (result_tx, result_rx) = mpsc::channel::<NodeExecutionResult>(result_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(runner_count.max(1));
        for runner_id in 0..runner_count.max(1) {
            handles.push(tokio::spawn(runner(
                runner_id,
                rx.clone(),
                sandboxes.clone(),
                result_tx.clone(),
            )));
        }

        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            results: std::sync::Mutex::new(Some(result_rx)),
            handles: std::sync::Mutex::new(handles),
        }
    }

    /// Enqueue one work item without blocking.
    pub fn submit(&self, item: WorkItem) -> EngineResult<()> {
        let guard = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = guard
            .as_ref()
            .ok_or_else(|| EngineError::Internal("worker pool is stopped".to_string()))?;
        tx.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                EngineError::CapacityExceeded("worker pool queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                EngineError::Internal("worker pool queue is closed".to_string())
            }
        })
    }

    /// Take the result stream. Yields results in completion order and
    /// closes once the pool is stopped and drained. Can be taken once.
    pub fn take_results(&self) -> Option<mpsc::Receiver<NodeExecutionResult>> {
        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Stop accepting work and wait for the runners to drain the queue.
    pub async fn stop(&self) {
        // Dropping the sender closes the queue; runners exit after the
        // backlog is drained.
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker pool runner panicked");
            }
        }
    }
}

async fn runner(
    runner_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    sandboxes: Arc<SandboxPool>,
    results: mpsc::Sender<NodeExecutionResult>,
) {
    loop {
        let item = { rx.lock().await.recv().await };
        let Some(item) = item else {
            debug!(runner_id, "work queue closed, runner exiting");
            break;
        };

        let request_id = item.request.id.clone();
        let result = match sandboxes.acquire().await {
            Ok(lease) => {
                let result = lease.execute(&item.cancel, item.request).await;
                sandboxes.release(lease);
                result
            }
            Err(err) => {
                warn!(runner_id, request_id = %request_id, error = %err, "sandbox acquire failed");
                NodeExecutionResult::failed(request_id.clone(), err.to_string(), 0)
            }
        };

        debug!(
            runner_id,
            request_id = %request_id,
            status = ?result.status,
            duration_ms = result.metrics.duration_ms,
            "node execution finished"
        );
        if results.send(result).await.is_err() {
            // Result consumer went away; nothing left to report to.
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use flowd_sandbox::native::HandlerRegistry;
    use flowd_sandbox::pool::SandboxSpec;
    use flowd_sandbox::request::SandboxStatus;
    use serde_json::json;

    use super::*;

    fn sandbox_pool() -> Arc<SandboxPool> {
        let mut reg = HandlerRegistry::new();
        reg.register_fn("echo", |input| Ok(input));
        reg.register_fn("explode", |_| Err("boom".to_string()));
        Arc::new(SandboxPool::new(
            SandboxSpec::Native {
                handlers: Arc::new(reg),
            },
            4,
        ))
    }

    fn item(id: &str, node_type: &str) -> WorkItem {
        WorkItem::new(
            NodeExecutionRequest::new(node_type, json!({"n": 1})).with_id(id),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn submitted_work_produces_a_correlated_result() {
        let pool = WorkerPool::start(sandbox_pool(), 2, 8, 8);
        let mut results = pool.take_results().unwrap();

        pool.submit(item("t-1", "echo")).unwrap();
        let result = results.recv().await.unwrap();
        assert_eq!(result.request_id, "t-1");
        assert_eq!(result.status, SandboxStatus::Completed);
        assert_eq!(result.output, Some(json!({"n": 1})));
        pool.stop().await;
    }

    #[tokio::test]
    async fn handler_failure_is_a_failed_result_not_a_lost_item() {
        let pool = WorkerPool::start(sandbox_pool(), 1, 8, 8);
        let mut results = pool.take_results().unwrap();

        pool.submit(item("t-2", "explode")).unwrap();
        let result = results.recv().await.unwrap();
        assert_eq!(result.request_id, "t-2");
        assert_eq!(result.status, SandboxStatus::Failed);
        pool.stop().await;
    }

    #[tokio::test]
    async fn full_queue_rejects_with_capacity_exceeded() {
        let mut reg = HandlerRegistry::new();
        reg.register_fn("echo", |input| Ok(input));
        // Single-slot sandbox pool and a held lease: nothing drains.
        let sandboxes = Arc::new(SandboxPool::new(
            SandboxSpec::Native {
                handlers: Arc::new(reg),
            },
            1,
        ));
        let held = sandboxes.acquire().await.unwrap();

        let pool = WorkerPool::start(sandboxes.clone(), 1, 1, 8);
        let _results = pool.take_results().unwrap();

        // First item is picked up by the runner (blocked on acquire),
        // second fills the queue slot, third must be rejected.
        pool.submit(item("a", "echo")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.submit(item("b", "echo")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = pool.submit(item("c", "echo")).unwrap_err();
        assert_matches!(err, EngineError::CapacityExceeded(_));

        sandboxes.release(held);
        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_queued_work_before_returning() {
        let pool = WorkerPool::start(sandbox_pool(), 1, 8, 8);
        let mut results = pool.take_results().unwrap();

        for i in 0..4 {
            pool.submit(item(&format!("t-{i}"), "echo")).unwrap();
        }
        pool.stop().await;

        let mut seen = 0;
        while let Some(result) = results.recv().await {
            assert_eq!(result.status, SandboxStatus::Completed);
            seen += 1;
        }
        assert_eq!(seen, 4);
    }

    #[tokio::test]
    async fn submit_after_stop_is_an_error() {
        let pool = WorkerPool::start(sandbox_pool(), 1, 8, 8);
        pool.stop().await;
        let err = pool.submit(item("late", "echo")).unwrap_err();
        assert_matches!(err, EngineError::Internal(_));
    }
}
