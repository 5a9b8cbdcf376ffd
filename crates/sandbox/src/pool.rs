//! Bounded, reusable pool of sandbox instances of one backend.
//!
//! Instances are created lazily up to the pool ceiling; `acquire` blocks
//! on a semaphore once the ceiling is reached. A released instance goes
//! back on the free list unless it reports unhealthy, in which case it is
//! discarded and a fresh one is built on the next acquire.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::backend::SandboxBackend;
use crate::error::SandboxError;
use crate::native::{HandlerRegistry, NativeSandbox};
use crate::sandbox::Sandbox;
use crate::subprocess::SubprocessSandbox;

/// How to build instances for one configured backend.
#[derive(Clone)]
pub enum SandboxSpec {
    Native {
        handlers: Arc<HandlerRegistry>,
    },
    Subprocess {
        program: String,
        args: Vec<String>,
    },
}

impl std::fmt::Debug for SandboxSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native { .. } => f.debug_struct("Native").finish_non_exhaustive(),
            Self::Subprocess { program, args } => f
                .debug_struct("Subprocess")
                .field("program", program)
                .field("args", args)
                .finish(),
        }
    }
}

impl SandboxSpec {
    /// Resolve a spec for a backend requested by name.
    pub fn for_backend(
        backend: SandboxBackend,
        handlers: Arc<HandlerRegistry>,
        subprocess_program: Option<(String, Vec<String>)>,
    ) -> Result<Self, SandboxError> {
        match backend {
            SandboxBackend::Native => Ok(Self::Native { handlers }),
            SandboxBackend::Subprocess => {
                let (program, args) = subprocess_program.ok_or_else(|| {
                    SandboxError::UnsupportedBackend(
                        "subprocess backend requires a configured program".to_string(),
                    )
                })?;
                Ok(Self::Subprocess { program, args })
            }
            other => Err(SandboxError::UnsupportedBackend(other.as_str().to_string())),
        }
    }

    pub fn backend(&self) -> SandboxBackend {
        match self {
            Self::Native { .. } => SandboxBackend::Native,
            Self::Subprocess { .. } => SandboxBackend::Subprocess,
        }
    }

    fn build(&self) -> Box<dyn Sandbox> {
        match self {
            Self::Native { handlers } => Box::new(NativeSandbox::new(handlers.clone())),
            Self::Subprocess { program, args } => {
                Box::new(SubprocessSandbox::new(program.clone(), args.clone()))
            }
        }
    }
}

/// A borrowed sandbox instance plus the pool slot it occupies.
///
/// Return it with [`SandboxPool::release`]; dropping the lease instead
/// discards the instance (the slot is freed either way).
pub struct SandboxLease {
    sandbox: Box<dyn Sandbox>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for SandboxLease {
    type Target = dyn Sandbox;

    fn deref(&self) -> &Self::Target {
        &*self.sandbox
    }
}

/// Bounded pool of one backend's sandbox instances.
pub struct SandboxPool {
    spec: SandboxSpec,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn Sandbox>>>,
}

impl SandboxPool {
    /// Create a pool with a hard ceiling of `max_size` live instances.
    pub fn new(spec: SandboxSpec, max_size: usize) -> Self {
        Self {
            spec,
            slots: Arc::new(Semaphore::new(max_size.max(1))),
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn backend(&self) -> SandboxBackend {
        self.spec.backend()
    }

    /// Borrow an instance, waiting for a slot if the pool is exhausted.
    /// Reuses an idle instance when one exists, otherwise builds lazily.
    pub async fn acquire(&self) -> Result<SandboxLease, SandboxError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::PoolClosed)?;

        let reused = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let sandbox = match reused {
            Some(instance) => instance,
            None => self.spec.build(),
        };
        Ok(SandboxLease {
            sandbox,
            _permit: permit,
        })
    }

    /// Return a borrowed instance. Unhealthy instances are discarded.
    pub fn release(&self, lease: SandboxLease) {
        if lease.sandbox.is_healthy() {
            self.idle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(lease.sandbox);
        }
        // The permit drops with the lease, freeing the slot.
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
