//! Self-heartbeat loop for the local worker registration.
//!
//! The standalone host is both scheduler and worker, so its liveness
//! report is a loop re-submitting the registry's own view of the worker
//! on a timer. An offline demotion (e.g. after a long debugger pause) is
//! healed by the next beat, since the heartbeat is the only path that
//! clears `Offline`.

use std::sync::Arc;
use std::time::Duration;

use flowd_core::types::DbId;
use flowd_core::worker::{HeartbeatInput, WorkerStatus};
use flowd_engine::ExecutorService;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run the heartbeat loop until `shutdown` fires.
pub fn spawn(
    scheduler: Arc<ExecutorService>,
    worker_id: DbId,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let me = scheduler
                .workers_snapshot()
                .await
                .into_iter()
                .find(|w| w.id == worker_id);
            let Some(me) = me else {
                warn!(worker_id, "local worker registration disappeared, heartbeat stopping");
                break;
            };

            let status = match me.status {
                WorkerStatus::Offline => WorkerStatus::Idle,
                status => status,
            };
            let report = HeartbeatInput {
                worker_id,
                status,
                current_load: me.current_load,
            };
            match scheduler.heartbeat(report).await {
                Ok(_) => debug!(worker_id, status = status.as_str(), "heartbeat sent"),
                Err(err) => warn!(worker_id, error = %err, "heartbeat failed"),
            }
        }
        debug!(worker_id, "heartbeat loop exiting");
    })
}
