//! Row models matching the engine tables, with domain conversions.

pub mod execution;
pub mod task;
pub mod worker;

pub use execution::ExecutionRow;
pub use task::TaskRow;
pub use worker::WorkerRow;

use flowd_core::error::{EngineError, EngineResult};

/// Parse a lowercase status/trigger string stored in a TEXT column into
/// its domain enum (which serializes with `rename_all = "lowercase"`).
pub(crate) fn parse_enum<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> EngineResult<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| EngineError::Store(format!("invalid {column} value: \"{value}\"")))
}

#[cfg(test)]
mod tests {
    use flowd_core::execution::ExecutionStatus;
    use flowd_core::worker::WorkerStatus;

    use super::*;

    #[test]
    fn parses_known_values() {
        let status: ExecutionStatus = parse_enum("status", "running").unwrap();
        assert_eq!(status, ExecutionStatus::Running);
        let status: WorkerStatus = parse_enum("status", "offline").unwrap();
        assert_eq!(status, WorkerStatus::Offline);
    }

    #[test]
    fn rejects_unknown_values() {
        let err = parse_enum::<ExecutionStatus>("status", "limbo").unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
    }
}
