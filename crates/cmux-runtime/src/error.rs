// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Stable error kinds for filesystem/exec operations against a [`crate::Runtime`].
///
/// These propagate to the bridge as tagged values (spec §7 "Runtime" kinds),
/// never as panics.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("transport error: {0}")]
    Transport(String),
}

impl RuntimeError {
    /// Stable machine-readable kind, used by transports that serialize the
    /// error separately from its display message.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::NotFound(_) => "not_found",
            RuntimeError::NotADirectory(_) => "not_a_directory",
            RuntimeError::PermissionDenied(_) => "permission_denied",
            RuntimeError::Timeout(_) => "timeout",
            RuntimeError::Transport(_) => "transport_error",
        }
    }
}
