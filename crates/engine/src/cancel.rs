//! Per-execution cancellation tokens.
//!
//! The service registers a token when an execution starts; the dispatcher
//! attaches it to every work item of that execution so an in-flight node
//! observes cancellation cooperatively.

use std::collections::HashMap;
use std::sync::Mutex;

use flowd_core::types::DbId;
use tokio_util::sync::CancellationToken;

/// Registry of one [`CancellationToken`] per live execution.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<DbId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or return the existing) token for an execution.
    pub fn register(&self, execution_id: DbId) -> CancellationToken {
        self.lock()
            .entry(execution_id)
            .or_default()
            .clone()
    }

    /// Token for an execution, if one is registered. Callers that get
    /// `None` fall back to a fresh token (nothing will ever cancel it).
    pub fn get(&self, execution_id: DbId) -> Option<CancellationToken> {
        self.lock().get(&execution_id).cloned()
    }

    /// Fire the execution's token. A no-op for unknown executions.
    pub fn cancel(&self, execution_id: DbId) {
        if let Some(token) = self.lock().get(&execution_id) {
            token.cancel();
        }
    }

    /// Drop the token once the execution reached a terminal state.
    pub fn remove(&self, execution_id: DbId) {
        self.lock().remove(&execution_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DbId, CancellationToken>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let reg = CancellationRegistry::new();
        let a = reg.register(1);
        let b = reg.register(1);
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn cancel_fires_the_registered_token() {
        let reg = CancellationRegistry::new();
        let token = reg.register(7);
        reg.cancel(7);
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_unknown_execution_is_a_noop() {
        let reg = CancellationRegistry::new();
        reg.cancel(99);
        assert!(reg.get(99).is_none());
    }

    #[test]
    fn remove_forgets_the_token() {
        let reg = CancellationRegistry::new();
        reg.register(1);
        reg.remove(1);
        assert!(reg.get(1).is_none());
    }
}
