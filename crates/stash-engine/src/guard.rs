//! Ownership and current-version checks shared by every file operation.

use stash_meta::MetaTransaction;
use stash_types::{AccountId, FileId, FileVersion, LogicalFile};

use crate::error::{EngineError, EngineResult};

/// Outcome of looking up a file on behalf of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// The file exists, is live, and belongs to the caller.
    Found(LogicalFile),
    /// Missing, deleted, or someone else's; deliberately not distinguished.
    NotFoundOrForbidden,
}

impl Ownership {
    /// Look up `file_id` as `owner` sees it.
    pub fn check(
        tx: &mut dyn MetaTransaction,
        file_id: &FileId,
        owner: &AccountId,
    ) -> EngineResult<Self> {
        Ok(match tx.live_file(file_id, owner)? {
            Some(file) => Self::Found(file),
            None => Self::NotFoundOrForbidden,
        })
    }

    pub fn into_result(self) -> EngineResult<LogicalFile> {
        match self {
            Self::Found(file) => Ok(file),
            Self::NotFoundOrForbidden => Err(EngineError::NotFoundOrForbidden),
        }
    }
}

/// The file if `owner` may act on it, `NotFoundOrForbidden` otherwise.
pub fn owned_file(
    tx: &mut dyn MetaTransaction,
    file_id: &FileId,
    owner: &AccountId,
) -> EngineResult<LogicalFile> {
    Ownership::check(tx, file_id, owner)?.into_result()
}

/// The single current version of a live file.
pub fn current_version(
    tx: &mut dyn MetaTransaction,
    file: &LogicalFile,
) -> EngineResult<FileVersion> {
    let mut current: Vec<FileVersion> = tx
        .versions(&file.id)?
        .into_iter()
        .filter(|v| v.is_current)
        .collect();
    match current.len() {
        1 => Ok(current.remove(0)),
        n => Err(EngineError::IntegrityViolation(format!(
            "file {} has {n} current versions",
            file.id
        ))),
    }
}
