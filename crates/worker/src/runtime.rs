//! Full-stack assembly for the standalone host.

use std::sync::Arc;

use flowd_core::error::{EngineError, EngineResult};
use flowd_core::graph::WorkflowResolver;
use flowd_core::store::{ExecutionStore, TaskStore, WorkerStore};
use flowd_core::worker::{RegisterWorkerInput, Worker};
use flowd_db::store::{PgExecutionStore, PgTaskStore, PgWorkerStore};
use flowd_engine::memory::{MemoryCache, MemoryExecutionStore, MemoryTaskStore, MemoryWorkerStore};
use flowd_engine::orchestrator::Orchestrator;
use flowd_engine::{
    CancellationRegistry, EngineConfig, ExecutionService, ExecutorService, LocalDispatcher,
    WorkerPool,
};
use flowd_events::EventBus;
use flowd_sandbox::{HandlerRegistry, SandboxBackend, SandboxPool, SandboxSpec};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::heartbeat;

/// The assembled engine plus this process's own worker registration.
pub struct WorkerRuntime {
    pub service: Arc<ExecutionService>,
    pub scheduler: Arc<ExecutorService>,
    pub events: Arc<EventBus>,
    pub worker: Worker,
    pool: Arc<WorkerPool>,
    result_consumer: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl WorkerRuntime {
    /// Build and start the full stack, register this process as a
    /// worker, and start its heartbeat.
    pub async fn build(
        config: EngineConfig,
        resolver: Arc<dyn WorkflowResolver>,
        handlers: HandlerRegistry,
    ) -> EngineResult<Self> {
        let (executions, tasks, workers) = stores().await?;
        let events = Arc::new(EventBus::default());
        let cancels = Arc::new(CancellationRegistry::new());

        let backend = SandboxBackend::from_name(&config.sandbox_backend)
            .map_err(|err| EngineError::Validation(err.to_string()))?;
        let spec = SandboxSpec::for_backend(
            backend,
            Arc::new(handlers),
            config.sandbox_program.clone().map(split_program),
        )
        .map_err(|err| EngineError::Validation(err.to_string()))?;
        info!(backend = %backend, pool_size = config.sandbox_pool_size, "sandbox pool configured");
        let sandboxes = Arc::new(SandboxPool::new(spec, config.sandbox_pool_size));

        let pool = Arc::new(WorkerPool::start(
            sandboxes,
            config.runner_count,
            config.queue_capacity,
            config.result_capacity,
        ));
        let dispatcher = Arc::new(LocalDispatcher::new(
            pool.clone(),
            cancels.clone(),
            config.default_timeout_ms,
        ));

        let scheduler = ExecutorService::new(
            tasks.clone(),
            workers,
            dispatcher,
            events.clone(),
            &config,
        );
        scheduler.start().await?;
        let results = pool
            .take_results()
            .ok_or_else(|| EngineError::Internal("result stream already taken".to_string()))?;
        let result_consumer = scheduler.consume_results(results);

        let orchestrator = Arc::new(Orchestrator::new(
            executions.clone(),
            tasks,
            scheduler.clone(),
            events.clone(),
            config.orchestrator_poll,
        ));
        let service = ExecutionService::new(
            executions,
            resolver,
            orchestrator,
            events.clone(),
            Arc::new(MemoryCache::new()),
            cancels,
            config.cache_ttl,
        );

        let worker = scheduler.register_worker(local_worker_input(&config)).await?;
        info!(worker_id = worker.id, name = %worker.name, capacity = worker.capacity, "local worker registered");

        let shutdown = CancellationToken::new();
        let heartbeat = heartbeat::spawn(
            scheduler.clone(),
            worker.id,
            config.health_check_interval,
            shutdown.clone(),
        );

        Ok(Self {
            service,
            scheduler,
            events,
            worker,
            pool,
            result_consumer,
            heartbeat,
            shutdown,
        })
    }

    /// Graceful stop: scheduler loops first, then the worker pool drain,
    /// then the result consumer and heartbeat.
    pub async fn shutdown(self) {
        info!("runtime shutting down");
        self.shutdown.cancel();
        self.scheduler.shutdown().await;
        self.pool.stop().await;
        if let Err(err) = self.result_consumer.await {
            warn!(error = %err, "result consumer panicked");
        }
        if let Err(err) = self.heartbeat.await {
            warn!(error = %err, "heartbeat loop panicked");
        }
    }
}

async fn stores() -> EngineResult<(
    Arc<dyn ExecutionStore>,
    Arc<dyn TaskStore>,
    Arc<dyn WorkerStore>,
)> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = flowd_db::create_pool(&url)
                .await
                .map_err(|err| EngineError::Store(err.to_string()))?;
            info!("state stored in postgresql");
            Ok((
                Arc::new(PgExecutionStore::new(pool.clone())),
                Arc::new(PgTaskStore::new(pool.clone())),
                Arc::new(PgWorkerStore::new(pool)),
            ))
        }
        Err(_) => {
            info!("DATABASE_URL not set, state stored in memory");
            Ok((
                Arc::new(MemoryExecutionStore::new()),
                Arc::new(MemoryTaskStore::new()),
                Arc::new(MemoryWorkerStore::new()),
            ))
        }
    }
}

/// Split `SANDBOX_PROGRAM` into program and arguments.
fn split_program(command: String) -> (String, Vec<String>) {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_default();
    (program, parts.collect())
}

/// Registration input for this process's own worker entry.
///
/// | Variable          | Default          |
/// |-------------------|------------------|
/// | `WORKER_NAME`     | `flowd-worker-1` |
/// | `WORKER_PORT`     | 9400             |
/// | `WORKER_CAPACITY` | `RUNNER_COUNT`   |
/// | `WORKER_TAGS`     | (none)           |
fn local_worker_input(config: &EngineConfig) -> RegisterWorkerInput {
    let tags = std::env::var("WORKER_TAGS").ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    });
    RegisterWorkerInput {
        name: std::env::var("WORKER_NAME").unwrap_or_else(|_| "flowd-worker-1".to_string()),
        host: "127.0.0.1".to_string(),
        port: std::env::var("WORKER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9400),
        capacity: std::env::var("WORKER_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.runner_count as u32),
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_program_separates_arguments() {
        let (program, args) = split_program("python3 -u runner.py".to_string());
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["-u", "runner.py"]);
    }

    #[test]
    fn local_worker_defaults_track_runner_count() {
        let config = EngineConfig {
            runner_count: 6,
            ..EngineConfig::default()
        };
        let input = local_worker_input(&config);
        assert_eq!(input.capacity, 6);
        assert_eq!(input.name, "flowd-worker-1");
    }
}
