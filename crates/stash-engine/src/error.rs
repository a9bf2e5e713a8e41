use stash_types::AccountId;

/// Errors returned by storage engine operations.
///
/// The boundary layer decides how each maps to a user-facing response;
/// the engine only guarantees that a failed operation committed nothing.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The acting account does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// Committing the operation would push usage past the account limit.
    #[error("quota exceeded: {used} used + {requested} requested > {limit} limit")]
    QuotaExceeded {
        used: u64,
        limit: u64,
        requested: u64,
    },

    /// The file does not exist, is deleted, or belongs to another account.
    /// The three cases are indistinguishable on purpose.
    #[error("file not found")]
    NotFoundOrForbidden,

    /// Metadata is internally inconsistent (e.g. a live file without exactly
    /// one current version).
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Storage limits must be positive.
    #[error("invalid storage limit: {0}")]
    InvalidLimit(u64),

    #[error("metadata error: {0}")]
    Metadata(#[from] stash_meta::MetaError),

    #[error("blob error: {0}")]
    Blob(#[from] stash_blob::BlobError),
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_message_names_all_numbers() {
        let err = EngineError::QuotaExceeded {
            used: 600,
            limit: 1000,
            requested: 500,
        };
        let msg = err.to_string();
        assert!(msg.contains("600") && msg.contains("500") && msg.contains("1000"));
    }
}
