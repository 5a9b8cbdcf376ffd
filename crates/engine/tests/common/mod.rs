//! Shared wiring for the engine integration tests: memory stores, a
//! native sandbox pool, the in-process worker pool, scheduler, and
//! service, resolved against a fixed workflow graph.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowd_core::error::{EngineError, EngineResult};
use flowd_core::graph::{NodeSpec, WorkflowGraph, WorkflowResolver};
use flowd_core::store::{ExecutionStore, TaskStore};
use flowd_core::task::Task;
use flowd_core::types::DbId;
use flowd_core::worker::{RegisterWorkerInput, Worker};
use flowd_engine::memory::{MemoryCache, MemoryExecutionStore, MemoryTaskStore, MemoryWorkerStore};
use flowd_engine::orchestrator::Orchestrator;
use flowd_engine::{
    CancellationRegistry, EngineConfig, ExecutionService, ExecutorService, LocalDispatcher,
    WorkerPool,
};
use flowd_events::EventBus;
use flowd_sandbox::native::HandlerRegistry;
use flowd_sandbox::pool::{SandboxPool, SandboxSpec};
use serde_json::json;

/// Resolver that always serves one pre-built graph.
pub struct StaticResolver {
    graph: WorkflowGraph,
}

#[async_trait]
impl WorkflowResolver for StaticResolver {
    async fn resolve(&self, workflow_id: DbId) -> EngineResult<WorkflowGraph> {
        if workflow_id == self.graph.workflow_id {
            Ok(self.graph.clone())
        } else {
            Err(EngineError::NotFound {
                entity: "workflow",
                id: workflow_id,
            })
        }
    }
}

pub struct Engine {
    pub service: Arc<ExecutionService>,
    pub scheduler: Arc<ExecutorService>,
    pub events: Arc<EventBus>,
    pub executions: Arc<MemoryExecutionStore>,
    pub tasks: Arc<MemoryTaskStore>,
    pub pool: Arc<WorkerPool>,
}

impl Engine {
    /// Wire the full in-process stack around `graph` and `handlers`.
    pub async fn start(graph: WorkflowGraph, handlers: HandlerRegistry, config: EngineConfig) -> Self {
        Self::start_wrapped(graph, handlers, config, |store| store).await
    }

    /// Like [`Engine::start`], but lets the test interpose on the
    /// execution store (fault injection, artificial latency). The
    /// returned engine still exposes the backing memory store for direct
    /// assertions.
    pub async fn start_wrapped<F>(
        graph: WorkflowGraph,
        handlers: HandlerRegistry,
        config: EngineConfig,
        wrap: F,
    ) -> Self
    where
        F: FnOnce(Arc<MemoryExecutionStore>) -> Arc<dyn ExecutionStore>,
    {
        let executions = Arc::new(MemoryExecutionStore::new());
        let wrapped = wrap(executions.clone());
        let tasks = Arc::new(MemoryTaskStore::new());
        let workers = Arc::new(MemoryWorkerStore::new());
        let events = Arc::new(EventBus::default());
        let cancels = Arc::new(CancellationRegistry::new());

        let sandboxes = Arc::new(SandboxPool::new(
            SandboxSpec::Native {
                handlers: Arc::new(handlers),
            },
            config.sandbox_pool_size,
        ));
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
            workers.clone(),
            dispatcher,
            events.clone(),
            &config,
        );
        scheduler.start().await.expect("scheduler start");
        scheduler.consume_results(pool.take_results().expect("result stream"));

        let orchestrator = Arc::new(Orchestrator::new(
            wrapped.clone(),
            tasks.clone(),
            scheduler.clone(),
            events.clone(),
            config.orchestrator_poll,
        ));
        let service = ExecutionService::new(
            wrapped,
            Arc::new(StaticResolver { graph }),
            orchestrator,
            events.clone(),
            Arc::new(MemoryCache::new()),
            cancels,
            config.cache_ttl,
        );

        Self {
            service,
            scheduler,
            events,
            executions,
            tasks,
            pool,
        }
    }

    pub async fn add_worker(&self, name: &str, capacity: u32, tags: &[&str]) -> Worker {
        self.scheduler
            .register_worker(RegisterWorkerInput {
                name: name.into(),
                host: "127.0.0.1".into(),
                port: 9000,
                capacity,
                tags: Some(tags.iter().map(|t| t.to_string()).collect()),
            })
            .await
            .expect("register worker")
    }

    pub async fn tasks_for(&self, execution_id: DbId) -> Vec<Task> {
        self.tasks
            .find_by_execution(execution_id)
            .await
            .expect("tasks by execution")
    }
}

/// Tight polling intervals so the scenarios converge quickly.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        orchestrator_poll: Duration::from_millis(10),
        dispatch_backoff: Duration::from_millis(10),
        ..EngineConfig::default()
    }
}

pub fn node(id: &str, node_type: &str, deps: &[&str]) -> NodeSpec {
    NodeSpec {
        id: id.into(),
        node_type: node_type.into(),
        config: json!({"node": id}),
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        tags: vec![],
        max_retries: None,
    }
}

pub fn graph(workflow_id: DbId, nodes: Vec<NodeSpec>) -> WorkflowGraph {
    WorkflowGraph {
        workflow_id,
        version: 1,
        nodes,
    }
}

/// Poll `condition` until it holds or a 5s deadline passes.
pub async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
