//! Workflow resolution from a directory of JSON graph files.
//!
//! Workflow authoring lives outside the engine; the standalone host
//! resolves `<WORKFLOW_DIR>/<id>.json` into a [`WorkflowGraph`]. The file
//! format is the serde shape of the graph itself.

use std::path::PathBuf;

use async_trait::async_trait;
use flowd_core::error::{EngineError, EngineResult};
use flowd_core::graph::{WorkflowGraph, WorkflowResolver};
use flowd_core::types::DbId;

pub struct FileResolver {
    dir: PathBuf,
}

impl FileResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl WorkflowResolver for FileResolver {
    async fn resolve(&self, workflow_id: DbId) -> EngineResult<WorkflowGraph> {
        let path = self.dir.join(format!("{workflow_id}.json"));
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| EngineError::NotFound {
                entity: "workflow",
                id: workflow_id,
            })?;
        let graph: WorkflowGraph = serde_json::from_slice(&bytes).map_err(|err| {
            EngineError::Validation(format!("workflow {workflow_id} is not a valid graph: {err}"))
        })?;
        graph.validate()?;
        Ok(graph)
    }
}
