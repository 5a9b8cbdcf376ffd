//! Pure worker-selection logic used by the cluster scheduler.
//!
//! Selection is deterministic: among eligible workers the lowest current
//! load wins, and ties are broken by `(registered_at, id)` ascending so a
//! given registry state always yields the same pick.

use crate::types::DbId;
use crate::worker::Worker;

/// Pick the worker a task with `required_tags` should be dispatched to.
///
/// Eligible workers are not offline, have spare capacity, and possess
/// every required tag. Returns `None` when no worker is eligible.
pub fn select_worker<'a, I>(workers: I, required_tags: &[String]) -> Option<DbId>
where
    I: IntoIterator<Item = &'a Worker>,
{
    workers
        .into_iter()
        .filter(|w| w.is_eligible(required_tags))
        .min_by_key(|w| (w.current_load, w.registered_at, w.id))
        .map(|w| w.id)
}
