//! Runtime error types

use thiserror::Error;

/// Errors surfaced by a runtime's build and run operations.
///
/// Bundler diagnostics are not errors; they travel back inside
/// [`BuildOutput`](crate::BuildOutput) for the caller to judge.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Bundler unavailable: {0}")]
    Bundler(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Short machine-readable code for logs and CLI output
    pub fn code(&self) -> &'static str {
        match self {
            Self::HandlerNotFound(_) => "HandlerNotFound",
            Self::Bundler(_) => "BundlerError",
            Self::Spawn(_) => "SpawnError",
            Self::Io(_) => "IoError",
        }
    }
}
