/// Infrastructure-level sandbox failures.
///
/// Outcomes of running node logic (failure, timeout, cancellation) are not
/// errors — they are encoded in the result status. These variants cover
/// the cases where no result could be produced at all.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox backend not supported: {0}")]
    UnsupportedBackend(String),

    #[error("Unknown sandbox backend: \"{0}\"")]
    UnknownBackend(String),

    #[error("Sandbox pool is closed")]
    PoolClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
