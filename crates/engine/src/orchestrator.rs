//! Drives one execution through its workflow graph.
//!
//! The orchestrator owns the execution's node records and is the only
//! writer of them. It dispatches nodes in dependency waves: a node is
//! submitted as a task once every upstream dependency completed, results
//! are polled off the task store, and a terminally failed node fails the
//! execution and skips its downstream closure. Pause stops new waves
//! without touching in-flight work; cancel is observed from the stored
//! status and ends the run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use flowd_core::error::{EngineError, EngineResult};
use flowd_core::execution::{
    Execution, ExecutionError, ExecutionStatus, NodeExecution, NodeStatus,
};
use flowd_core::graph::{NodeSpec, WorkflowGraph};
use flowd_core::store::{ExecutionStore, TaskStore};
use flowd_core::task::{SubmitTaskInput, Task, TaskStatus};
use flowd_core::types::DbId;
use flowd_events::{event_types, EventBus, ExecutionEvent};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::executor::ExecutorService;

pub struct Orchestrator {
    executions: Arc<dyn ExecutionStore>,
    tasks: Arc<dyn TaskStore>,
    scheduler: Arc<ExecutorService>,
    events: Arc<EventBus>,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        tasks: Arc<dyn TaskStore>,
        scheduler: Arc<ExecutorService>,
        events: Arc<EventBus>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            executions,
            tasks,
            scheduler,
            events,
            poll_interval,
        }
    }

    /// Run `execution_id` through `graph` until it reaches a terminal
    /// state, and return the terminal execution.
    ///
    /// Safe to call on a resumed execution: node records that already
    /// have a task are not re-submitted.
    pub async fn run(&self, execution_id: DbId, graph: WorkflowGraph) -> EngineResult<Execution> {
        let mut execution = self.executions.find_by_id(execution_id).await?;
        if execution.status == ExecutionStatus::Pending {
            execution.start()?;
            self.executions.update(&execution).await?;
            info!(execution_id, workflow_id = execution.workflow_id, "execution started");
        }
        if execution.status.is_terminal() {
            return Ok(execution);
        }

        loop {
            // Status and the control timestamps are externally owned
            // (pause/resume/cancel go through the service); adopt the
            // stored record and overlay the node records this driver
            // owns.
            let mut stored = self.executions.find_by_id(execution_id).await?;
            stored.node_executions = std::mem::take(&mut execution.node_executions);
            execution = stored;

            let tasks = self.tasks.find_by_execution(execution_id).await?;
            self.apply_task_results(&mut execution, &tasks);

            match execution.status {
                ExecutionStatus::Cancelled => {
                    return self.finish_cancelled(execution).await;
                }
                ExecutionStatus::Completed | ExecutionStatus::Failed => {
                    // Terminal through some other path; nothing left to drive.
                    return Ok(execution);
                }
                _ => {}
            }

            if let Some(node_id) = first_failed_node(&execution) {
                return self.finish_failed(execution, &graph, &node_id).await;
            }

            if execution.status == ExecutionStatus::Running {
                self.dispatch_wave(&mut execution, &graph, &tasks).await?;

                if execution.node_executions.len() == graph.nodes.len()
                    && execution.all_nodes_terminal()
                {
                    return self.finish_completed(execution, &graph).await;
                }
            }

            // Checkpoint node progress only. Writing the whole record
            // here would race the service's controls: a pause or cancel
            // committed while this iteration ran would be overwritten
            // with the status adopted at the top of the loop.
            self.executions.update_nodes(&execution).await?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    // ── Result application ───────────────────────────────────────────────

    /// Fold task progress into the execution's node records.
    fn apply_task_results(&self, execution: &mut Execution, tasks: &[Task]) {
        for task in tasks {
            let Some(node) = execution.node_mut(&task.node_id) else {
                continue;
            };
            if node.status.is_terminal() {
                continue;
            }
            node.retry_count = task.retries;
            match task.status {
                TaskStatus::Running => node.mark_running(),
                TaskStatus::Completed => {
                    node.complete(task.output.clone().unwrap_or(Value::Null));
                }
                TaskStatus::Failed => {
                    let error = task.error.clone().unwrap_or_else(|| {
                        ExecutionError::new("node_failed", "node execution failed")
                    });
                    node.fail(error);
                }
                TaskStatus::Pending => {}
            }
        }
    }

    // ── Wave dispatch ────────────────────────────────────────────────────

    /// Submit every node whose dependencies completed and that has no
    /// task yet. A full scheduler queue stops the wave; the remainder is
    /// retried on the next poll.
    async fn dispatch_wave(
        &self,
        execution: &mut Execution,
        graph: &WorkflowGraph,
        tasks: &[Task],
    ) -> EngineResult<()> {
        let with_task: HashSet<&str> = tasks.iter().map(|t| t.node_id.as_str()).collect();
        let completed: HashSet<String> = execution
            .node_executions
            .values()
            .filter(|n| n.status == NodeStatus::Completed)
            .map(|n| n.node_id.clone())
            .collect();
        let scheduled: HashSet<String> = execution
            .node_executions
            .values()
            .filter(|n| with_task.contains(n.node_id.as_str()) || n.status.is_terminal())
            .map(|n| n.node_id.clone())
            .collect();

        let ready: Vec<NodeSpec> = graph
            .ready_nodes(&completed, &scheduled)
            .into_iter()
            .cloned()
            .collect();
        for spec in ready {
            let input = node_input(execution, &spec);
            execution.record_node(NodeExecution::new(&spec.id, &spec.node_type, input.clone()));
            let submitted = self
                .scheduler
                .submit_task(SubmitTaskInput {
                    execution_id: execution.id,
                    node_id: spec.id.clone(),
                    task_type: spec.node_type.clone(),
                    priority: None,
                    input,
                    max_retries: spec.max_retries,
                    tags: Some(spec.tags.clone()),
                })
                .await;
            match submitted {
                Ok(task) => {
                    debug!(
                        execution_id = execution.id,
                        node_id = %spec.id,
                        task_id = task.id,
                        "node submitted"
                    );
                }
                Err(EngineError::CapacityExceeded(reason)) => {
                    // Backpressure: stop this wave, the poll loop retries.
                    warn!(execution_id = execution.id, node_id = %spec.id, %reason, "wave paused by queue backpressure");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    // ── Terminal transitions ─────────────────────────────────────────────

    async fn finish_completed(
        &self,
        mut execution: Execution,
        graph: &WorkflowGraph,
    ) -> EngineResult<Execution> {
        let mut output = Map::new();
        for leaf in graph.leaf_nodes() {
            let value = execution
                .node_executions
                .get(&leaf.id)
                .and_then(|n| n.output.clone())
                .unwrap_or(Value::Null);
            output.insert(leaf.id.clone(), value);
        }
        execution.complete(Value::Object(output))?;
        self.executions.update(&execution).await?;
        info!(
            execution_id = execution.id,
            duration_ms = execution.duration_ms,
            "execution completed"
        );
        self.events.publish(
            ExecutionEvent::new(event_types::EXECUTION_COMPLETED, "execution", execution.id)
                .with_user(execution.user_id),
        );
        Ok(execution)
    }

    async fn finish_failed(
        &self,
        mut execution: Execution,
        graph: &WorkflowGraph,
        node_id: &str,
    ) -> EngineResult<Execution> {
        // Everything downstream of the failed node can never run.
        for blocked_id in graph.downstream_of(node_id) {
            let Some(spec) = graph.node(&blocked_id) else {
                continue;
            };
            let record = execution.record_node(NodeExecution::new(
                &spec.id,
                &spec.node_type,
                Value::Null,
            ));
            if !record.status.is_terminal() {
                record.skip();
            }
        }

        let (cause, retries) = execution
            .node_executions
            .get(node_id)
            .map(|n| (n.error.clone(), n.retry_count))
            .unwrap_or((None, 0));
        let error = ExecutionError::new(
            "node_failed",
            format!("node \"{node_id}\" failed after {retries} retries"),
        )
        .with_details(json!({"node_id": node_id, "cause": cause}));
        execution.fail(error)?;
        self.executions.update(&execution).await?;
        warn!(execution_id = execution.id, node_id, "execution failed");
        self.events.publish(
            ExecutionEvent::new(event_types::EXECUTION_FAILED, "execution", execution.id)
                .with_user(execution.user_id)
                .with_payload(json!({"node_id": node_id})),
        );
        Ok(execution)
    }

    /// The service already moved the execution to cancelled and fired the
    /// cancellation token; purge the tasks still waiting in the scheduler
    /// queue, close out the node records, and stop driving.
    async fn finish_cancelled(&self, mut execution: Execution) -> EngineResult<Execution> {
        // Queued-but-undispatched tasks would otherwise outlive the
        // fired token and run for real once it is dropped.
        self.scheduler.purge_execution(execution.id).await?;
        for node in execution.node_executions.values_mut() {
            if !node.status.is_terminal() {
                node.skip();
            }
        }
        self.executions.update(&execution).await?;
        info!(execution_id = execution.id, "execution cancelled, orchestration stopped");
        Ok(execution)
    }
}

/// First terminally failed node, if any. Ties are broken by node id so
/// concurrent failures produce a deterministic execution error.
fn first_failed_node(execution: &Execution) -> Option<String> {
    execution
        .node_executions
        .values()
        .filter(|n| n.status == NodeStatus::Failed)
        .map(|n| n.node_id.clone())
        .min()
}

/// Assemble one node's input: its configuration, the trigger input, and
/// the outputs of its direct dependencies keyed by node id.
fn node_input(execution: &Execution, spec: &NodeSpec) -> Value {
    let mut upstream = Map::new();
    for dep in &spec.depends_on {
        let output = execution
            .node_executions
            .get(dep)
            .and_then(|n| n.output.clone())
            .unwrap_or(Value::Null);
        upstream.insert(dep.clone(), output);
    }
    json!({
        "config": spec.config,
        "trigger": execution.input,
        "upstream": Value::Object(upstream),
    })
}

#[cfg(test)]
mod tests {
    use flowd_core::execution::TriggerType;

    use super::*;

    fn spec(id: &str, deps: &[&str]) -> NodeSpec {
        NodeSpec {
            id: id.into(),
            node_type: "noop".into(),
            config: json!({"k": id}),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            tags: vec![],
            max_retries: None,
        }
    }

    #[test]
    fn node_input_collects_upstream_outputs() {
        let mut execution = Execution::new(1, 1, 7, TriggerType::Manual, json!({"q": 1}));
        execution.start().unwrap();
        let record = execution.record_node(NodeExecution::new("a", "noop", json!({})));
        record.mark_running();
        record.complete(json!({"value": 42}));

        let input = node_input(&execution, &spec("b", &["a"]));
        assert_eq!(input["config"], json!({"k": "b"}));
        assert_eq!(input["trigger"], json!({"q": 1}));
        assert_eq!(input["upstream"]["a"], json!({"value": 42}));
    }

    #[test]
    fn missing_upstream_output_becomes_null() {
        let execution = Execution::new(1, 1, 7, TriggerType::Manual, json!({}));
        let input = node_input(&execution, &spec("b", &["ghost"]));
        assert_eq!(input["upstream"]["ghost"], Value::Null);
    }

    #[test]
    fn first_failed_node_is_deterministic() {
        let mut execution = Execution::new(1, 1, 7, TriggerType::Manual, json!({}));
        execution.start().unwrap();
        for id in ["b", "a"] {
            let record = execution.record_node(NodeExecution::new(id, "noop", json!({})));
            record.fail(ExecutionError::new("node_failed", "x"));
        }
        assert_eq!(first_failed_node(&execution), Some("a".to_string()));
    }
}
