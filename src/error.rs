//! Error types for the streaming pipeline.

use crate::storage::StorageError;

/// Errors surfaced by the session lifecycle and its collaborators.
///
/// Steady-state per-segment failures are logged where they happen and never
/// reach the caller; this type covers the paths that do.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session setup failed before the stream became ready.
    #[error("Setup failed: {0}")]
    Setup(String),

    /// No segment was fully replicated within the start timeout.
    #[error("Stream did not become ready within {0} seconds")]
    StartTimeout(u64),

    /// The external transcoder could not be spawned or supervised.
    #[error("Transcoder error: {0}")]
    Transcoder(String),

    /// A storage backend operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The requested session does not exist.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
