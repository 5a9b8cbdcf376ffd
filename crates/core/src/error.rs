use crate::types::DbId;

/// Engine-wide error taxonomy.
///
/// `CapacityExceeded` is a backpressure signal, not a fault: callers are
/// expected to retry or shed load. `Timeout` and `Cancelled` are
/// sandbox-level outcomes recorded on the affected node execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Execution timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("No eligible worker: {0}")]
    WorkerUnavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
