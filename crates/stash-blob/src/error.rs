use stash_types::{StorageKey, TypeError};

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob is stored under the key.
    #[error("blob not found: {0}")]
    NotFound(StorageKey),

    /// A key read back from the backend is not a valid storage key.
    #[error("invalid storage key: {0}")]
    InvalidKey(#[from] TypeError),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend is read-only or otherwise unavailable.
    #[error("blob store is read-only")]
    ReadOnly,

    /// Internal lock was poisoned by a panicking writer.
    #[error("blob store lock poisoned: {0}")]
    Poisoned(String),
}

/// Result alias for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;
