//! The uniform execution contract all backends implement.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backend::SandboxBackend;
use crate::request::{NodeExecutionRequest, NodeExecutionResult};

/// An isolated execution context for one node's logic.
///
/// Implementations must honor the request's deadline and observe `cancel`,
/// returning a distinguished timed-out/cancelled result rather than hang.
/// Run outcomes (including node-logic failures) are encoded in the result
/// status; an infrastructure problem surfaces as a failed result too, so
/// no execution silently disappears.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Which backend this instance belongs to.
    fn backend(&self) -> SandboxBackend;

    /// Whether the instance may be returned to the pool for reuse.
    /// A damaged or expired instance is discarded instead.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Run one request to completion, timeout, or cancellation.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: NodeExecutionRequest,
    ) -> NodeExecutionResult;
}
