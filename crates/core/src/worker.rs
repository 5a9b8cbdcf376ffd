//! Worker registry entity: capacity/load bookkeeping and validation.
//!
//! A [`Worker`] is a registered process able to run tasks, with a fixed
//! capacity and capability tags. Load mutations are saturating so a
//! double-release can never drive `current_load` negative, and `Offline`
//! is sticky: only an explicit fresh heartbeat clears it.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// If a worker has not sent a heartbeat within this many seconds, the
/// health check marks it offline.
pub const OFFLINE_THRESHOLD_SECS: u64 = 60;

/// How often the health-check loop scans for stale workers.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Maximum length of a worker name.
const MAX_NAME_LEN: usize = 128;

/// Maximum number of tags a worker may have.
const MAX_TAGS: usize = 32;

/// Maximum length of a single tag.
const MAX_TAG_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A registered worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: DbId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub status: WorkerStatus,
    pub capacity: u32,
    pub current_load: u32,
    pub tags: Vec<String>,
    pub last_heartbeat: Timestamp,
    pub registered_at: Timestamp,
}

impl Worker {
    /// Build a newly registered idle worker with zero load and a fresh
    /// heartbeat. The id is assigned by the store on creation.
    pub fn from_input(input: RegisterWorkerInput) -> Result<Self, EngineError> {
        validate_worker_name(&input.name)?;
        let tags = input.tags.unwrap_or_default();
        validate_tags(&tags)?;
        if input.capacity == 0 {
            return Err(EngineError::Validation(
                "Worker capacity must be at least 1".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: 0,
            name: input.name,
            host: input.host,
            port: input.port,
            status: WorkerStatus::Idle,
            capacity: input.capacity,
            current_load: 0,
            tags,
            last_heartbeat: now,
            registered_at: now,
        })
    }

    /// Whether this worker may receive `required_tags` work right now:
    /// not offline, below capacity, and possessing every required tag.
    pub fn is_eligible(&self, required_tags: &[String]) -> bool {
        self.status != WorkerStatus::Offline
            && self.current_load < self.capacity
            && required_tags.iter().all(|t| self.tags.contains(t))
    }

    /// Dispatch bookkeeping: take one capacity slot (saturating at
    /// capacity) and flip to busy when full.
    pub fn take_slot(&mut self) {
        self.current_load = (self.current_load + 1).min(self.capacity);
        if self.current_load >= self.capacity {
            self.status = WorkerStatus::Busy;
        }
    }

    /// Release one capacity slot, saturating at zero.
    ///
    /// An offline worker keeps its offline status: release never
    /// resurrects a worker the health check demoted. Recovery requires a
    /// fresh heartbeat.
    pub fn release_slot(&mut self) {
        self.current_load = self.current_load.saturating_sub(1);
        if self.status != WorkerStatus::Offline && self.current_load < self.capacity {
            self.status = WorkerStatus::Idle;
        }
    }

    /// Apply a heartbeat report from the worker itself.
    ///
    /// This is the only path that can clear `Offline`. The reported load
    /// is clamped to capacity.
    pub fn apply_heartbeat(&mut self, status: WorkerStatus, current_load: u32) {
        self.last_heartbeat = Utc::now();
        self.current_load = current_load.min(self.capacity);
        self.status = status;
    }

    /// Whether the last heartbeat is older than `threshold_secs`.
    pub fn is_stale(&self, now: Timestamp, threshold_secs: u64) -> bool {
        (now - self.last_heartbeat).num_seconds() > threshold_secs as i64
    }

    /// Health-check demotion. Sticky until a fresh heartbeat arrives.
    pub fn mark_offline(&mut self) {
        self.status = WorkerStatus::Offline;
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a worker name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_worker_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::Validation(
            "Worker name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::Validation(format!(
            "Worker name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(EngineError::Validation(
            "Worker name may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Validate a set of worker tags.
///
/// Rules:
/// - At most `MAX_TAGS` tags.
/// - Each tag must not be empty and must not exceed `MAX_TAG_LEN` characters.
/// - No duplicates.
pub fn validate_tags(tags: &[String]) -> Result<(), EngineError> {
    if tags.len() > MAX_TAGS {
        return Err(EngineError::Validation(format!(
            "A worker may have at most {MAX_TAGS} tags"
        )));
    }
    for (i, tag) in tags.iter().enumerate() {
        if tag.is_empty() {
            return Err(EngineError::Validation(format!(
                "Tag at index {i} must not be empty"
            )));
        }
        if tag.len() > MAX_TAG_LEN {
            return Err(EngineError::Validation(format!(
                "Tag at index {i} exceeds {MAX_TAG_LEN} characters"
            )));
        }
    }

    let mut seen = std::collections::HashSet::with_capacity(tags.len());
    for tag in tags {
        if !seen.insert(tag.as_str()) {
            return Err(EngineError::Validation(format!("Duplicate tag: \"{tag}\"")));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Inbound DTOs
// ---------------------------------------------------------------------------

/// Input for registering a worker with the scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterWorkerInput {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub capacity: u32,
    pub tags: Option<Vec<String>>,
}

/// Periodic liveness report from a worker.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatInput {
    pub worker_id: DbId,
    pub status: WorkerStatus,
    pub current_load: u32,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
