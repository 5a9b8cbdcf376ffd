//! Catalog of sandbox environment identifiers.

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// The isolation backends a caller may request by name.
///
/// `Wasm` and `Container` are part of the catalog so the contract stays
/// uniform, but constructing them currently reports
/// [`SandboxError::UnsupportedBackend`] — the engine ships no WASM runtime
/// or container client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// In-process handler execution. No isolation beyond the timeout.
    Native,
    /// Script-engine isolate: node logic runs in a spawned child process.
    Subprocess,
    /// WASM module execution.
    Wasm,
    /// Container-per-request execution.
    Container,
}

impl SandboxBackend {
    /// All known identifiers, requestable by name.
    pub const CATALOG: [SandboxBackend; 4] = [
        Self::Native,
        Self::Subprocess,
        Self::Wasm,
        Self::Container,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Subprocess => "subprocess",
            Self::Wasm => "wasm",
            Self::Container => "container",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, SandboxError> {
        match name {
            "native" => Ok(Self::Native),
            "subprocess" => Ok(Self::Subprocess),
            "wasm" => Ok(Self::Wasm),
            "container" => Ok(Self::Container),
            other => Err(SandboxError::UnknownBackend(other.to_string())),
        }
    }

    /// Whether this backend can actually be constructed in this build.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Native | Self::Subprocess)
    }
}

impl std::fmt::Display for SandboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
