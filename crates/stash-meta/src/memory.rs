//! In-memory metadata store.
//!
//! [`InMemoryMetadataStore`] keeps all rows in `HashMap`s behind a single
//! `Mutex`. A transaction holds the lock for its whole lifetime, so
//! transactions are fully serialized (stronger than the read-committed
//! floor the engine needs). Writes are applied in place and journaled; a
//! transaction that is dropped or fails to commit replays its journal
//! backwards. Nothing outlives the process; durable deployments use
//! [`SqliteMetadataStore`](crate::SqliteMetadataStore).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use stash_types::{Account, AccountId, FileId, FileVersion, LogicalFile, StorageKey, VersionId};
use tracing::debug;

use crate::error::{MetaError, MetaResult};
use crate::traits::{MetaTransaction, MetadataStore};

#[derive(Default)]
struct MetaState {
    accounts: HashMap<AccountId, Account>,
    files: HashMap<FileId, LogicalFile>,
    versions: HashMap<VersionId, FileVersion>,
}

/// Prior value of a row touched by a transaction. `None` means the row did
/// not exist before and must be removed on rollback.
enum Undo {
    Account(AccountId, Option<Account>),
    File(FileId, Option<LogicalFile>),
    Version(VersionId, Option<FileVersion>),
}

/// An in-memory implementation of [`MetadataStore`].
pub struct InMemoryMetadataStore {
    state: Mutex<MetaState>,
    fail_next_commit: AtomicBool,
}

impl InMemoryMetadataStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MetaState::default()),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// Make the next commit fail with [`MetaError::CommitFailed`].
    ///
    /// Fault-injection hook for exercising rollback paths.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of logical file rows, deleted ones included.
    pub fn file_count(&self) -> MetaResult<usize> {
        Ok(self.lock()?.files.len())
    }

    /// Number of version rows.
    pub fn version_count(&self) -> MetaResult<usize> {
        Ok(self.lock()?.versions.len())
    }

    fn lock(&self) -> MetaResult<MutexGuard<'_, MetaState>> {
        self.state
            .lock()
            .map_err(|e| MetaError::Poisoned(e.to_string()))
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetadataStore").finish_non_exhaustive()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn begin(&self) -> MetaResult<Box<dyn MetaTransaction + '_>> {
        Ok(Box::new(InMemoryTransaction {
            store: self,
            state: self.lock()?,
            undo: Vec::new(),
            done: false,
        }))
    }
}

struct InMemoryTransaction<'a> {
    store: &'a InMemoryMetadataStore,
    state: MutexGuard<'a, MetaState>,
    undo: Vec<Undo>,
    done: bool,
}

impl InMemoryTransaction<'_> {
    fn rollback(&mut self) {
        let writes = self.undo.len();
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Account(id, Some(row)) => {
                    self.state.accounts.insert(id, row);
                }
                Undo::Account(id, None) => {
                    self.state.accounts.remove(&id);
                }
                Undo::File(id, Some(row)) => {
                    self.state.files.insert(id, row);
                }
                Undo::File(id, None) => {
                    self.state.files.remove(&id);
                }
                Undo::Version(id, Some(row)) => {
                    self.state.versions.insert(id, row);
                }
                Undo::Version(id, None) => {
                    self.state.versions.remove(&id);
                }
            }
        }
        if writes > 0 {
            debug!(writes, "metadata transaction rolled back");
        }
    }

    fn version_mut(&mut self, id: &VersionId) -> MetaResult<&mut FileVersion> {
        let prior = self
            .state
            .versions
            .get(id)
            .cloned()
            .ok_or_else(|| MetaError::RowNotFound {
                table: "file_versions",
                id: id.to_string(),
            })?;
        self.undo.push(Undo::Version(*id, Some(prior)));
        self.state
            .versions
            .get_mut(id)
            .ok_or_else(|| MetaError::RowNotFound {
                table: "file_versions",
                id: id.to_string(),
            })
    }
}

impl Drop for InMemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.rollback();
        }
    }
}

impl MetaTransaction for InMemoryTransaction<'_> {
    fn insert_account(&mut self, account: &Account) -> MetaResult<()> {
        if self.state.accounts.contains_key(&account.id) {
            return Err(MetaError::Duplicate {
                table: "accounts",
                id: account.id.to_string(),
            });
        }
        self.undo.push(Undo::Account(account.id, None));
        self.state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn account(&mut self, id: &AccountId) -> MetaResult<Option<Account>> {
        Ok(self.state.accounts.get(id).cloned())
    }

    fn account_for_update(&mut self, id: &AccountId) -> MetaResult<Option<Account>> {
        // The whole store is already locked by this transaction.
        self.account(id)
    }

    fn adjust_storage_used(&mut self, id: &AccountId, delta: i128) -> MetaResult<Account> {
        let row = self
            .state
            .accounts
            .get(id)
            .cloned()
            .ok_or_else(|| MetaError::RowNotFound {
                table: "accounts",
                id: id.to_string(),
            })?;

        let next = i128::from(row.storage_used) + delta;
        let storage_used = u64::try_from(next).map_err(|_| MetaError::Constraint {
            table: "accounts",
            reason: format!(
                "storage_used {} adjusted by {delta} is out of range",
                row.storage_used
            ),
        })?;

        let updated = Account {
            storage_used,
            ..row.clone()
        };
        self.undo.push(Undo::Account(*id, Some(row)));
        self.state.accounts.insert(*id, updated.clone());
        Ok(updated)
    }

    fn insert_file(&mut self, file: &LogicalFile) -> MetaResult<()> {
        if self.state.files.contains_key(&file.id) {
            return Err(MetaError::Duplicate {
                table: "files",
                id: file.id.to_string(),
            });
        }
        if !self.state.accounts.contains_key(&file.owner_id) {
            return Err(MetaError::Constraint {
                table: "files",
                reason: format!("owner {} does not exist", file.owner_id),
            });
        }
        self.undo.push(Undo::File(file.id, None));
        self.state.files.insert(file.id, file.clone());
        Ok(())
    }

    fn live_file(&mut self, id: &FileId, owner: &AccountId) -> MetaResult<Option<LogicalFile>> {
        Ok(self
            .state
            .files
            .get(id)
            .filter(|f| f.is_live_for(owner))
            .cloned())
    }

    fn live_files(&mut self, owner: &AccountId) -> MetaResult<Vec<LogicalFile>> {
        Ok(self
            .state
            .files
            .values()
            .filter(|f| f.is_live_for(owner))
            .cloned()
            .collect())
    }

    fn mark_deleted(&mut self, id: &FileId, at: DateTime<Utc>) -> MetaResult<()> {
        let prior = self
            .state
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| MetaError::RowNotFound {
                table: "files",
                id: id.to_string(),
            })?;
        let deleted = LogicalFile {
            deleted_at: Some(at),
            ..prior.clone()
        };
        self.undo.push(Undo::File(*id, Some(prior)));
        self.state.files.insert(*id, deleted);
        Ok(())
    }

    fn insert_version(&mut self, version: &FileVersion) -> MetaResult<()> {
        if self.state.versions.contains_key(&version.id) {
            return Err(MetaError::Duplicate {
                table: "file_versions",
                id: version.id.to_string(),
            });
        }
        if !self.state.files.contains_key(&version.file_id) {
            return Err(MetaError::Constraint {
                table: "file_versions",
                reason: format!("file {} does not exist", version.file_id),
            });
        }
        self.undo.push(Undo::Version(version.id, None));
        self.state.versions.insert(version.id, version.clone());
        Ok(())
    }

    fn versions(&mut self, file: &FileId) -> MetaResult<Vec<FileVersion>> {
        let mut versions: Vec<FileVersion> = self
            .state
            .versions
            .values()
            .filter(|v| v.file_id == *file)
            .cloned()
            .collect();
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(versions)
    }

    fn set_current(&mut self, id: &VersionId, is_current: bool) -> MetaResult<()> {
        self.version_mut(id)?.is_current = is_current;
        Ok(())
    }

    fn set_display_name(&mut self, id: &VersionId, name: &str) -> MetaResult<()> {
        self.version_mut(id)?.display_name = name.to_string();
        Ok(())
    }

    fn live_storage_keys(&mut self) -> MetaResult<HashSet<StorageKey>> {
        let files = &self.state.files;
        Ok(self
            .state
            .versions
            .values()
            .filter(|v| files.get(&v.file_id).is_some_and(|f| !f.is_deleted()))
            .map(|v| v.storage_key.clone())
            .collect())
    }

    fn commit(mut self: Box<Self>) -> MetaResult<()> {
        if self.store.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(MetaError::CommitFailed("injected commit failure".into()));
        }
        self.done = true;
        self.undo.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_account(store: &InMemoryMetadataStore, limit: u64) -> Account {
        let account = Account::new(limit);
        let mut tx = store.begin().unwrap();
        tx.insert_account(&account).unwrap();
        tx.commit().unwrap();
        account
    }

    fn version_for(file: &LogicalFile, size: u64, current: bool) -> FileVersion {
        FileVersion {
            id: VersionId::new(),
            file_id: file.id,
            storage_key: StorageKey::generate("blob.bin"),
            original_name: "blob.bin".into(),
            display_name: "blob.bin".into(),
            size,
            mime_type: "application/octet-stream".into(),
            created_at: Utc::now(),
            is_current: current,
        }
    }

    // ---- Commit and rollback ----

    #[test]
    fn committed_writes_are_visible() {
        let store = InMemoryMetadataStore::new();
        let account = seed_account(&store, 1000);

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.account(&account.id).unwrap(), Some(account));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = InMemoryMetadataStore::new();
        let account = seed_account(&store, 1000);
        let file = LogicalFile::new(account.id);

        {
            let mut tx = store.begin().unwrap();
            tx.insert_file(&file).unwrap();
            tx.insert_version(&version_for(&file, 10, true)).unwrap();
            tx.adjust_storage_used(&account.id, 10).unwrap();
        }

        let mut tx = store.begin().unwrap();
        assert!(tx.live_file(&file.id, &account.id).unwrap().is_none());
        assert!(tx.versions(&file.id).unwrap().is_empty());
        assert_eq!(tx.account(&account.id).unwrap().unwrap().storage_used, 0);
    }

    #[test]
    fn rollback_restores_updated_rows() {
        let store = InMemoryMetadataStore::new();
        let account = seed_account(&store, 1000);
        let file = LogicalFile::new(account.id);
        let version = version_for(&file, 5, true);
        {
            let mut tx = store.begin().unwrap();
            tx.insert_file(&file).unwrap();
            tx.insert_version(&version).unwrap();
            tx.commit().unwrap();
        }
        {
            let mut tx = store.begin().unwrap();
            tx.set_current(&version.id, false).unwrap();
            tx.set_display_name(&version.id, "renamed").unwrap();
            tx.mark_deleted(&file.id, Utc::now()).unwrap();
        }

        let mut tx = store.begin().unwrap();
        let versions = tx.versions(&file.id).unwrap();
        assert_eq!(versions, vec![version]);
        assert!(tx.live_file(&file.id, &account.id).unwrap().is_some());
    }

    #[test]
    fn injected_commit_failure_rolls_back() {
        let store = InMemoryMetadataStore::new();
        let account = seed_account(&store, 1000);

        store.fail_next_commit();
        let mut tx = store.begin().unwrap();
        tx.adjust_storage_used(&account.id, 42).unwrap();
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, MetaError::CommitFailed(_)));

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.account(&account.id).unwrap().unwrap().storage_used, 0);
        tx.adjust_storage_used(&account.id, 1).unwrap();
        tx.commit().unwrap();
    }

    // ---- Counter constraints ----

    #[test]
    fn counter_cannot_go_negative() {
        let store = InMemoryMetadataStore::new();
        let account = seed_account(&store, 1000);

        let mut tx = store.begin().unwrap();
        tx.adjust_storage_used(&account.id, 100).unwrap();
        let err = tx.adjust_storage_used(&account.id, -101).unwrap_err();
        assert!(matches!(err, MetaError::Constraint { .. }));
        let updated = tx.adjust_storage_used(&account.id, -100).unwrap();
        assert_eq!(updated.storage_used, 0);
    }

    #[test]
    fn adjust_unknown_account_fails() {
        let store = InMemoryMetadataStore::new();
        let mut tx = store.begin().unwrap();
        let err = tx.adjust_storage_used(&AccountId::new(), 1).unwrap_err();
        assert!(matches!(err, MetaError::RowNotFound { .. }));
    }

    // ---- Referential checks ----

    #[test]
    fn duplicate_and_dangling_rows_rejected() {
        let store = InMemoryMetadataStore::new();
        let account = seed_account(&store, 1000);

        let mut tx = store.begin().unwrap();
        assert!(matches!(
            tx.insert_account(&account),
            Err(MetaError::Duplicate { .. })
        ));
        assert!(matches!(
            tx.insert_file(&LogicalFile::new(AccountId::new())),
            Err(MetaError::Constraint { .. })
        ));
        let orphan = LogicalFile::new(account.id);
        assert!(matches!(
            tx.insert_version(&version_for(&orphan, 1, true)),
            Err(MetaError::Constraint { .. })
        ));
    }

    // ---- Queries ----

    #[test]
    fn live_queries_respect_owner_and_deletion() {
        let store = InMemoryMetadataStore::new();
        let alice = seed_account(&store, 1000);
        let bob = seed_account(&store, 1000);
        let kept = LogicalFile::new(alice.id);
        let gone = LogicalFile::new(alice.id);
        let bobs = LogicalFile::new(bob.id);

        let mut tx = store.begin().unwrap();
        for file in [&kept, &gone, &bobs] {
            tx.insert_file(file).unwrap();
            tx.insert_version(&version_for(file, 1, true)).unwrap();
        }
        tx.mark_deleted(&gone.id, Utc::now()).unwrap();

        let live = tx.live_files(&alice.id).unwrap();
        assert_eq!(live, vec![kept.clone()]);
        assert!(tx.live_file(&bobs.id, &alice.id).unwrap().is_none());
        assert!(tx.live_file(&gone.id, &alice.id).unwrap().is_none());
        assert_eq!(tx.live_storage_keys().unwrap().len(), 2);
    }

    #[test]
    fn versions_are_oldest_first() {
        let store = InMemoryMetadataStore::new();
        let account = seed_account(&store, 1000);
        let file = LogicalFile::new(account.id);

        let mut tx = store.begin().unwrap();
        tx.insert_file(&file).unwrap();
        let first = version_for(&file, 1, false);
        let mut second = version_for(&file, 2, true);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        tx.insert_version(&second).unwrap();
        tx.insert_version(&first).unwrap();

        let ids: Vec<VersionId> = tx.versions(&file.id).unwrap().iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    // ---- Concurrency ----

    #[test]
    fn concurrent_increments_are_serialized() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InMemoryMetadataStore::new());
        let account = seed_account(&store, u64::MAX);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let mut tx = store.begin().unwrap();
                        tx.adjust_storage_used(&account.id, 1).unwrap();
                        tx.commit().unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.account(&account.id).unwrap().unwrap().storage_used, 400);
    }
}
