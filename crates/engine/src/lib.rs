//! `flowd-engine` — the execution engine proper.
//!
//! Wires the domain model (`flowd-core`), the sandbox layer
//! (`flowd-sandbox`), and the event bus (`flowd-events`) into the three
//! moving parts of the engine:
//!
//! - [`WorkerPool`] — intra-process dispatcher: bounded request queue,
//!   a fixed set of runner loops over a [`SandboxPool`], bounded result
//!   stream.
//! - [`ExecutorService`] — cluster scheduler: worker registry, durable
//!   task queue, dispatch/health loops.
//! - [`ExecutionService`] — orchestrator: turns a resolved workflow graph
//!   into node tasks, applies results, drives the execution state
//!   machine.
//!
//! [`SandboxPool`]: flowd_sandbox::SandboxPool

pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod memory;
pub mod orchestrator;
pub mod service;
pub mod worker_pool;

pub use cancel::CancellationRegistry;
pub use config::EngineConfig;
pub use dispatch::{LocalDispatcher, TaskDispatcher};
pub use executor::ExecutorService;
pub use service::ExecutionService;
pub use worker_pool::{WorkItem, WorkerPool};
