//! `flowd-worker` — the standalone engine host.
//!
//! Wires the full stack (stores, sandbox pool, worker pool, scheduler,
//! execution service) into one process, registers itself as a worker,
//! and keeps its own heartbeat fresh. With `DATABASE_URL` set the state
//! lives in PostgreSQL; without it everything runs in memory.

pub mod handlers;
pub mod heartbeat;
pub mod resolver;
pub mod runtime;

pub use resolver::FileResolver;
pub use runtime::WorkerRuntime;
