//! Scheduler-level scenarios over the full stack: the worker registry,
//! the bounded queue, and the health check.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use flowd_core::error::EngineError;
use flowd_core::store::TaskStore;
use flowd_core::task::{SubmitTaskInput, TaskStatus};
use flowd_core::worker::{HeartbeatInput, WorkerStatus};
use flowd_events::event_types;
use flowd_sandbox::native::HandlerRegistry;
use flowd_engine::EngineConfig;
use serde_json::json;

use common::{graph, node, test_config, wait_for, Engine};

fn echo_registry() -> HandlerRegistry {
    let mut reg = HandlerRegistry::new();
    reg.register_fn("echo", |input| Ok(input));
    reg
}

fn submit(node_id: &str) -> SubmitTaskInput {
    SubmitTaskInput {
        execution_id: 1,
        node_id: node_id.into(),
        task_type: "echo".into(),
        priority: None,
        input: json!({"n": node_id}),
        max_retries: Some(0),
        tags: None,
    }
}

async fn engine_with(config: EngineConfig) -> Engine {
    Engine::start(graph(1, vec![node("a", "echo", &[])]), echo_registry(), config).await
}

#[tokio::test]
async fn task_waits_until_an_eligible_worker_registers() {
    let engine = engine_with(test_config()).await;

    let task = engine.scheduler.submit_task(submit("n1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let pending = engine.tasks.find_by_id(task.id).await.unwrap();
    assert_eq!(pending.status, TaskStatus::Pending);
    assert_eq!(engine.scheduler.queue_depth().await, 1);

    engine.add_worker("w1", 1, &[]).await;
    let tasks = engine.tasks.clone();
    wait_for("task to complete once a worker exists", || {
        let tasks = tasks.clone();
        async move {
            tasks
                .find_by_id(task.id)
                .await
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        }
    })
    .await;

    let done = engine.tasks.find_by_id(task.id).await.unwrap();
    assert_eq!(done.output, Some(json!({"n": "n1"})));
}

#[tokio::test]
async fn full_queue_sheds_load_instead_of_blocking() {
    let config = EngineConfig {
        queue_capacity: 1,
        ..test_config()
    };
    let engine = engine_with(config).await;

    // No workers: the first task parks on the queue, the second must be
    // rejected immediately.
    engine.scheduler.submit_task(submit("n1")).await.unwrap();
    let err = engine.scheduler.submit_task(submit("n2")).await.unwrap_err();
    assert_matches!(err, EngineError::CapacityExceeded(_));
}

#[tokio::test]
async fn stale_worker_is_demoted_and_a_heartbeat_revives_it() {
    // Zero threshold: any heartbeat older than a second is stale. The
    // periodic loop is left at its slow default; the check runs directly.
    let config = EngineConfig {
        offline_threshold: Duration::from_secs(0),
        ..test_config()
    };
    let engine = engine_with(config).await;
    let mut events = engine.events.subscribe();
    let worker = engine.add_worker("w1", 1, &[]).await;

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(engine.scheduler.check_worker_health().await.unwrap(), 1);
    assert_eq!(
        events.recv().await.unwrap().event_type,
        event_types::WORKER_OFFLINE
    );
    let snapshot = engine.scheduler.workers_snapshot().await;
    assert_eq!(snapshot[0].status, WorkerStatus::Offline);

    // An offline worker receives no work.
    let task = engine.scheduler.submit_task(submit("n1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        engine.tasks.find_by_id(task.id).await.unwrap().status,
        TaskStatus::Pending
    );

    // A fresh heartbeat is the only way back; dispatch then proceeds.
    engine
        .scheduler
        .heartbeat(HeartbeatInput {
            worker_id: worker.id,
            status: WorkerStatus::Idle,
            current_load: 0,
        })
        .await
        .unwrap();
    let tasks = engine.tasks.clone();
    wait_for("task to complete after revival", || {
        let tasks = tasks.clone();
        async move {
            tasks
                .find_by_id(task.id)
                .await
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        }
    })
    .await;
}

#[tokio::test]
async fn unregistered_worker_stops_receiving_work() {
    let engine = engine_with(test_config()).await;
    let worker = engine.add_worker("w1", 1, &[]).await;

    let first = engine.scheduler.submit_task(submit("n1")).await.unwrap();
    let tasks = engine.tasks.clone();
    wait_for("first task to complete", || {
        let tasks = tasks.clone();
        async move {
            tasks
                .find_by_id(first.id)
                .await
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        }
    })
    .await;

    engine.scheduler.unregister_worker(worker.id).await.unwrap();
    let second = engine.scheduler.submit_task(submit("n2")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        engine.tasks.find_by_id(second.id).await.unwrap().status,
        TaskStatus::Pending
    );
}
