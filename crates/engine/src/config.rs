//! Engine configuration, read from the environment.

use std::time::Duration;

use flowd_core::worker::{HEALTH_CHECK_INTERVAL_SECS, OFFLINE_THRESHOLD_SECS};
use flowd_sandbox::request::DEFAULT_TIMEOUT_MS;

/// Runtime configuration for the engine.
///
/// All values come from environment variables with sensible defaults:
///
/// | Variable                        | Default | Meaning                                   |
/// |---------------------------------|---------|-------------------------------------------|
/// | `TASK_QUEUE_CAPACITY`           | 256     | Bounded scheduler/dispatcher queue depth  |
/// | `RESULT_STREAM_CAPACITY`        | 256     | Bounded result channel depth              |
/// | `RUNNER_COUNT`                  | 4       | Worker-pool runner loops                  |
/// | `SANDBOX_POOL_SIZE`             | 8       | Sandbox instance ceiling                  |
/// | `SANDBOX_BACKEND`               | native  | Sandbox backend name                      |
/// | `SANDBOX_PROGRAM`               | (unset) | Program for the subprocess backend        |
/// | `NODE_TIMEOUT_MS`               | 30000   | Default per-node deadline                 |
/// | `WORKER_OFFLINE_THRESHOLD_SECS` | 60      | Heartbeat staleness threshold             |
/// | `HEALTH_CHECK_INTERVAL_SECS`    | 30      | Health-check scan interval                |
/// | `DISPATCH_BACKOFF_MS`           | 200     | Wait before re-scanning an idle queue     |
/// | `ORCHESTRATOR_POLL_MS`          | 50      | Orchestrator task-poll interval           |
/// | `EXECUTION_CACHE_TTL_SECS`      | 60      | Read-through cache TTL for executions     |
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub queue_capacity: usize,
    pub result_capacity: usize,
    pub runner_count: usize,
    pub sandbox_pool_size: usize,
    pub sandbox_backend: String,
    pub sandbox_program: Option<String>,
    pub default_timeout_ms: u64,
    pub offline_threshold: Duration,
    pub health_check_interval: Duration,
    pub dispatch_backoff: Duration,
    pub orchestrator_poll: Duration,
    pub cache_ttl: Duration,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            queue_capacity: env_parse("TASK_QUEUE_CAPACITY", 256),
            result_capacity: env_parse("RESULT_STREAM_CAPACITY", 256),
            runner_count: env_parse("RUNNER_COUNT", 4),
            sandbox_pool_size: env_parse("SANDBOX_POOL_SIZE", 8),
            sandbox_backend: std::env::var("SANDBOX_BACKEND")
                .unwrap_or_else(|_| "native".to_string()),
            sandbox_program: std::env::var("SANDBOX_PROGRAM").ok(),
            default_timeout_ms: env_parse("NODE_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),
            offline_threshold: Duration::from_secs(env_parse(
                "WORKER_OFFLINE_THRESHOLD_SECS",
                OFFLINE_THRESHOLD_SECS,
            )),
            health_check_interval: Duration::from_secs(env_parse(
                "HEALTH_CHECK_INTERVAL_SECS",
                HEALTH_CHECK_INTERVAL_SECS,
            )),
            dispatch_backoff: Duration::from_millis(env_parse("DISPATCH_BACKOFF_MS", 200)),
            orchestrator_poll: Duration::from_millis(env_parse("ORCHESTRATOR_POLL_MS", 50)),
            cache_ttl: Duration::from_secs(env_parse("EXECUTION_CACHE_TTL_SECS", 60)),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            result_capacity: 256,
            runner_count: 4,
            sandbox_pool_size: 8,
            sandbox_backend: "native".to_string(),
            sandbox_program: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            offline_threshold: Duration::from_secs(OFFLINE_THRESHOLD_SECS),
            health_check_interval: Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS),
            dispatch_backoff: Duration::from_millis(200),
            orchestrator_poll: Duration::from_millis(50),
            cache_ttl: Duration::from_secs(60),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.queue_capacity, 256);
        assert_eq!(cfg.runner_count, 4);
        assert_eq!(cfg.sandbox_backend, "native");
        assert_eq!(cfg.default_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(cfg.offline_threshold, Duration::from_secs(60));
    }
}
