//! `flowd-core` — domain model of the flowd execution engine.
//!
//! Entities, state machines, pure scheduling logic, and the collaborator
//! traits (persistence, cache, workflow resolution) that the engine is
//! wired against. This crate has zero internal dependencies so it can be
//! used by the engine, the database layer, and the worker host alike.

pub mod error;
pub mod execution;
pub mod graph;
pub mod selection;
pub mod store;
pub mod task;
pub mod types;
pub mod worker;

pub use error::{EngineError, EngineResult};
pub use execution::{Execution, ExecutionStatus, NodeExecution, NodeStatus, TriggerType};
pub use task::{Task, TaskStatus};
pub use worker::{Worker, WorkerStatus};
