use std::collections::HashSet;

use chrono::{DateTime, Utc};
use stash_types::{Account, AccountId, FileId, FileVersion, LogicalFile, StorageKey, VersionId};

use crate::error::MetaResult;

/// A transactional store of accounts, logical files and file versions.
///
/// Implementations must provide at least read-committed isolation, and
/// reads through [`MetaTransaction::account_for_update`] must hold the
/// account row locked until the transaction ends so that two transactions
/// charging the same account are serialized.
pub trait MetadataStore: Send + Sync {
    /// Start a transaction.
    fn begin(&self) -> MetaResult<Box<dyn MetaTransaction + '_>>;
}

/// One open metadata transaction.
///
/// Nothing written through a transaction is visible to others until
/// [`commit`](MetaTransaction::commit) returns `Ok`. Dropping the
/// transaction without committing, or a failing commit, discards every
/// write made through it.
pub trait MetaTransaction {
    // ---- Accounts ----

    fn insert_account(&mut self, account: &Account) -> MetaResult<()>;

    /// Plain read of an account row.
    fn account(&mut self, id: &AccountId) -> MetaResult<Option<Account>>;

    /// Read an account row and lock it for the rest of the transaction
    /// (`SELECT ... FOR UPDATE`).
    fn account_for_update(&mut self, id: &AccountId) -> MetaResult<Option<Account>>;

    /// Atomically add `delta` to `storage_used` and return the updated row.
    ///
    /// Fails with [`MetaError::Constraint`](crate::MetaError::Constraint)
    /// if the counter would become negative or overflow.
    fn adjust_storage_used(&mut self, id: &AccountId, delta: i128) -> MetaResult<Account>;

    // ---- Logical files ----

    fn insert_file(&mut self, file: &LogicalFile) -> MetaResult<()>;

    /// The file with `id` if it is owned by `owner` and not deleted.
    fn live_file(&mut self, id: &FileId, owner: &AccountId) -> MetaResult<Option<LogicalFile>>;

    /// Every non-deleted file owned by `owner`, in no particular order.
    fn live_files(&mut self, owner: &AccountId) -> MetaResult<Vec<LogicalFile>>;

    /// Set `deleted_at` on a file.
    fn mark_deleted(&mut self, id: &FileId, at: DateTime<Utc>) -> MetaResult<()>;

    // ---- File versions ----

    fn insert_version(&mut self, version: &FileVersion) -> MetaResult<()>;

    /// Every version of a file, current and superseded, oldest first.
    fn versions(&mut self, file: &FileId) -> MetaResult<Vec<FileVersion>>;

    fn set_current(&mut self, id: &VersionId, is_current: bool) -> MetaResult<()>;

    fn set_display_name(&mut self, id: &VersionId, name: &str) -> MetaResult<()>;

    /// Storage keys of every version that belongs to a non-deleted file.
    fn live_storage_keys(&mut self) -> MetaResult<HashSet<StorageKey>>;

    // ---- Lifecycle ----

    /// Make every write of this transaction durable and visible.
    fn commit(self: Box<Self>) -> MetaResult<()>;
}
