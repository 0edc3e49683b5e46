//! Error types for the vectorization service

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for vectorization operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, vectorizing or storing an image
#[derive(Error, Debug)]
pub enum Error {
    /// The source image could not be fetched or decoded
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Degenerate or oversized input (zero-size, fully transparent, too large)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A remote backend did not answer within its timeout
    #[error("Backend {backend} timed out after {timeout_ms}ms")]
    BackendTimeout { backend: String, timeout_ms: u64 },

    /// A remote backend answered with an error or an unusable reply
    #[error("Backend {backend} failed: {message}")]
    BackendError { backend: String, message: String },

    /// The local analyzer/tracer/composer failed
    #[error("Vectorization failed: {0}")]
    LocalPipelineFailure(String),

    /// The output artifact could not be persisted
    #[error("Failed to write artifact: {0}")]
    StorageWriteFailure(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The caller stopped waiting for the result
    #[error("Request canceled")]
    Cancelled,
}

/// Classification reported to callers in the `errorKind` result field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    SourceUnavailable,
    InvalidInput,
    BackendTimeout,
    BackendError,
    LocalPipelineFailure,
    StorageWriteFailure,
    ConfigError,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::BackendTimeout { .. } => ErrorKind::BackendTimeout,
            Error::BackendError { .. } => ErrorKind::BackendError,
            Error::LocalPipelineFailure(_) => ErrorKind::LocalPipelineFailure,
            Error::StorageWriteFailure(_) => ErrorKind::StorageWriteFailure,
            Error::ConfigError(_) => ErrorKind::ConfigError,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error came from the remote path and can be recovered by
    /// running the local pipeline instead.
    pub fn is_recoverable_remotely(&self) -> bool {
        matches!(self, Error::BackendTimeout { .. } | Error::BackendError { .. })
    }
}
