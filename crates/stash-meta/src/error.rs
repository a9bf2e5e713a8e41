//! Error types for metadata operations.

use thiserror::Error;

/// Errors that can occur during metadata operations.
#[derive(Debug, Error)]
pub enum MetaError {
    /// A row with the same primary key already exists.
    #[error("duplicate {table} row: {id}")]
    Duplicate { table: &'static str, id: String },

    /// An update targeted a row that does not exist.
    #[error("{table} row not found: {id}")]
    RowNotFound { table: &'static str, id: String },

    /// A row would violate a column constraint (e.g. a negative counter).
    #[error("constraint violated on {table}: {reason}")]
    Constraint { table: &'static str, reason: String },

    /// The transaction could not be committed; nothing was applied.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Internal lock was poisoned by a panicking transaction.
    #[error("metadata lock poisoned: {0}")]
    Poisoned(String),

    /// Error reported by the SQLite database.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error while preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for metadata operations.
pub type MetaResult<T> = std::result::Result<T, MetaError>;
