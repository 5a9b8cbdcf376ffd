//! Resolved workflow graph consumed by the orchestrator.
//!
//! Workflow lookup and authoring live outside the engine; the orchestrator
//! receives an already-resolved [`WorkflowGraph`] through the
//! [`WorkflowResolver`] collaborator. Dependency (DAG) order is enforced
//! here and in the orchestrator — the scheduler treats every task as
//! independent.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::types::DbId;

/// One node of a resolved workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub node_type: String,
    /// Node configuration, opaque to the engine.
    #[serde(default)]
    pub config: Value,
    /// Upstream node ids that must complete before this node runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Capability tags a worker must possess to run this node.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// A resolved workflow: the graph of nodes one execution runs through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub workflow_id: DbId,
    pub version: i32,
    pub nodes: Vec<NodeSpec>,
}

impl WorkflowGraph {
    /// Validate the graph: unique node ids, known dependencies, no cycles.
    pub fn validate(&self) -> EngineResult<()> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(EngineError::Validation(format!(
                    "Duplicate node id: \"{}\"",
                    node.id
                )));
            }
        }
        for node in &self.nodes {
            for dep in &node.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(EngineError::Validation(format!(
                        "Node \"{}\" depends on unknown node \"{dep}\"",
                        node.id
                    )));
                }
            }
        }
        // Kahn's algorithm: if not every node can be peeled off, a cycle
        // remains.
        let mut indegree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.depends_on.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            for dep in &node.depends_on {
                dependents.entry(dep.as_str()).or_default().push(node.id.as_str());
            }
        }
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut seen = 0usize;
        while let Some(id) = queue.pop_front() {
            seen += 1;
            for dependent in dependents.get(id).into_iter().flatten() {
                let d = indegree
                    .get_mut(dependent)
                    .ok_or_else(|| EngineError::Internal("indegree bookkeeping".into()))?;
                *d -= 1;
                if *d == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        if seen != self.nodes.len() {
            return Err(EngineError::Validation(
                "Workflow graph contains a cycle".to_string(),
            ));
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes whose dependencies are all in `completed` and that are not in
    /// `scheduled` yet. This is the next dispatch wave.
    pub fn ready_nodes(
        &self,
        completed: &HashSet<String>,
        scheduled: &HashSet<String>,
    ) -> Vec<&NodeSpec> {
        self.nodes
            .iter()
            .filter(|n| !scheduled.contains(&n.id))
            .filter(|n| n.depends_on.iter().all(|d| completed.contains(d)))
            .collect()
    }

    /// Transitive downstream closure of `node_id` (nodes that can never
    /// run once it failed).
    pub fn downstream_of(&self, node_id: &str) -> HashSet<String> {
        let mut blocked: HashSet<String> = HashSet::new();
        blocked.insert(node_id.to_string());
        // Nodes are not topologically sorted; iterate until fixpoint.
        loop {
            let before = blocked.len();
            for node in &self.nodes {
                if node.depends_on.iter().any(|d| blocked.contains(d)) {
                    blocked.insert(node.id.clone());
                }
            }
            if blocked.len() == before {
                break;
            }
        }
        blocked.remove(node_id);
        blocked
    }

    /// Terminal nodes: nodes no other node depends on. Their outputs form
    /// the execution output.
    pub fn leaf_nodes(&self) -> Vec<&NodeSpec> {
        let referenced: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.depends_on.iter().map(|d| d.as_str()))
            .collect();
        self.nodes
            .iter()
            .filter(|n| !referenced.contains(n.id.as_str()))
            .collect()
    }
}

/// Collaborator that resolves a stored workflow into an executable graph.
#[async_trait]
pub trait WorkflowResolver: Send + Sync {
    async fn resolve(&self, workflow_id: DbId) -> EngineResult<WorkflowGraph>;
}
