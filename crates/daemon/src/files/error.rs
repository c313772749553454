//! Error taxonomy shared by the path, listing and streaming components.

use thiserror::Error;

/// Errors that can occur while resolving, listing or streaming files.
#[derive(Debug, Error)]
pub enum FileError {
    /// The normalized path would leave the configured root.
    #[error("path traversal detected: {0}")]
    PathTraversal(String),

    /// The requested path does not exist.
    #[error("path does not exist: {0}")]
    NotFound(String),

    /// The principal has no grant covering the path.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The requested path is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(String),

    /// The requested path is a directory, not a file.
    #[error("path is a directory: {0}")]
    IsADirectory(String),

    /// The `Range` header is malformed or outside the file.
    #[error("range not satisfiable for file of size {total_size}")]
    RangeNotSatisfiable { total_size: u64 },

    /// Archive generation stopped before all entries were written.
    #[error("archive aborted at {entry}: {reason}")]
    ArchiveAborted { entry: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    /// Whether this error must be reported as a uniform "forbidden".
    ///
    /// Traversal attempts and missing grants are indistinguishable to clients.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::PathTraversal(_) | Self::PermissionDenied(_))
    }
}
