use std::path::PathBuf;

use hoard_types::ContentHash;

/// Errors from content store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The streamed bytes did not hash to the key they were stored under.
    ///
    /// Usually means the source file changed between hashing and storing.
    /// Nothing is persisted in this case.
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        expected: ContentHash,
        computed: ContentHash,
    },

    /// A fully written blob could not be moved into place.
    #[error("cannot persist blob to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
