//! `flowd-sandbox` — isolated execution contexts for node logic.
//!
//! A [`Sandbox`] executes one [`NodeExecutionRequest`] under resource
//! [`Constraints`] and returns a [`NodeExecutionResult`]. Isolation
//! strength is backend-dependent (native gives nothing beyond the timeout;
//! a subprocess gives process isolation) but the contract is uniform, so
//! callers stay backend-agnostic. Instances are reused across requests via
//! [`SandboxPool`], never shared concurrently.

pub mod backend;
pub mod error;
pub mod native;
pub mod pool;
pub mod request;
pub mod sandbox;
pub mod subprocess;

pub use backend::SandboxBackend;
pub use error::SandboxError;
pub use native::{HandlerRegistry, NativeSandbox, NodeHandler};
pub use pool::{SandboxLease, SandboxPool, SandboxSpec};
pub use request::{Constraints, ExecMetrics, NodeExecutionRequest, NodeExecutionResult, SandboxStatus};
pub use sandbox::Sandbox;
pub use subprocess::SubprocessSandbox;
