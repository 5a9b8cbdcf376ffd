//! flowd event bus.
//!
//! In-process publish/subscribe hub for execution lifecycle events:
//!
//! - [`EventBus`] — fan-out hub backed by `tokio::sync::broadcast`.
//! - [`ExecutionEvent`] — the canonical event envelope.
//!
//! Publishing is best-effort by contract: a failure to deliver an event
//! never fails the operation that produced it.

pub mod bus;

pub use bus::{event_types, EventBus, ExecutionEvent};
