//! Worker row model.

use flowd_core::error::{EngineError, EngineResult};
use flowd_core::types::{DbId, Timestamp};
use flowd_core::worker::Worker;
use sqlx::FromRow;

use super::parse_enum;

/// A row from the `workers` table.
#[derive(Debug, Clone, FromRow)]
pub struct WorkerRow {
    pub id: DbId,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub status: String,
    pub capacity: i32,
    pub current_load: i32,
    pub tags: serde_json::Value,
    pub last_heartbeat_at: Timestamp,
    pub registered_at: Timestamp,
}

impl WorkerRow {
    pub fn into_domain(self) -> EngineResult<Worker> {
        let tags: Vec<String> = serde_json::from_value(self.tags)
            .map_err(|e| EngineError::Store(format!("invalid tags: {e}")))?;
        Ok(Worker {
            id: self.id,
            name: self.name,
            host: self.host,
            port: self.port.clamp(0, u16::MAX as i32) as u16,
            status: parse_enum("status", &self.status)?,
            capacity: self.capacity.max(0) as u32,
            current_load: self.current_load.max(0) as u32,
            tags,
            last_heartbeat: self.last_heartbeat_at,
            registered_at: self.registered_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use flowd_core::worker::WorkerStatus;
    use serde_json::json;

    use super::*;

    #[test]
    fn row_round_trips_into_domain() {
        let row = WorkerRow {
            id: 3,
            name: "worker-01".into(),
            host: "10.0.0.1".into(),
            port: 9000,
            status: "busy".into(),
            capacity: 4,
            current_load: 4,
            tags: json!(["gpu", "a100"]),
            last_heartbeat_at: Utc::now(),
            registered_at: Utc::now(),
        };
        let worker = row.into_domain().unwrap();
        assert_eq!(worker.status, WorkerStatus::Busy);
        assert_eq!(worker.port, 9000);
        assert_eq!(worker.capacity, 4);
        assert_eq!(worker.tags.len(), 2);
    }
}
