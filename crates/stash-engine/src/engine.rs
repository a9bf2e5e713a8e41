use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use stash_blob::{BlobError, BlobLocation, BlobStore};
use stash_meta::MetadataStore;
use stash_types::{Account, AccountId, FileId, FileVersion, LogicalFile, StorageKey, VersionId};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::guard::{current_version, owned_file, Ownership};
use crate::model::{
    DeleteReport, DownloadTarget, FileSummary, NewVersionRequest, StorageStatus, UploadReceipt,
    UploadRequest,
};
use crate::quota;

/// The storage engine.
///
/// Stateless apart from its collaborators: every operation opens its own
/// metadata transaction, and all conflict resolution between concurrent
/// callers is left to the metadata store's isolation. Share it behind an
/// `Arc`.
pub struct StorageEngine {
    blobs: Arc<dyn BlobStore>,
    meta: Arc<dyn MetadataStore>,
    config: EngineConfig,
}

impl StorageEngine {
    pub fn new(blobs: Arc<dyn BlobStore>, meta: Arc<dyn MetadataStore>, config: EngineConfig) -> Self {
        Self {
            blobs,
            meta,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn metadata(&self) -> &dyn MetadataStore {
        self.meta.as_ref()
    }

    // ---- Accounts ----

    /// Create an account with nothing charged.
    ///
    /// Uses [`EngineConfig::default_storage_limit`] when `storage_limit` is
    /// `None`.
    pub fn provision_account(&self, storage_limit: Option<u64>) -> EngineResult<Account> {
        let limit = storage_limit.unwrap_or(self.config.default_storage_limit);
        if limit == 0 {
            return Err(EngineError::InvalidLimit(limit));
        }
        let account = Account::new(limit);
        let mut tx = self.meta.begin()?;
        tx.insert_account(&account)?;
        tx.commit()?;
        info!(account = %account.id, limit, "provisioned account");
        Ok(account)
    }

    /// Current usage and limit of an account.
    pub fn storage_status(&self, owner: &AccountId) -> EngineResult<StorageStatus> {
        let mut tx = self.meta.begin()?;
        let account = tx
            .account(owner)?
            .ok_or(EngineError::AccountNotFound(*owner))?;
        Ok(StorageStatus {
            used: account.storage_used,
            limit: account.storage_limit,
            remaining: account.remaining(),
        })
    }

    // ---- Writes ----

    /// Register an already-stored blob as a new logical file.
    ///
    /// On error nothing is committed, and the blob at `storage_key` is left
    /// for the caller to delete (see [`StorageEngine::ingest`]).
    pub fn upload(&self, request: UploadRequest) -> EngineResult<UploadReceipt> {
        let owner = request.owner_id;
        let mut tx = self.meta.begin()?;
        let reservation = quota::check_and_reserve(&mut *tx, &owner, request.size)?;

        let file = LogicalFile::new(owner);
        tx.insert_file(&file)?;

        let version = FileVersion {
            id: VersionId::new(),
            file_id: file.id,
            storage_key: request.storage_key,
            display_name: request
                .display_name
                .unwrap_or_else(|| request.original_name.clone()),
            original_name: request.original_name,
            size: request.size,
            mime_type: request.mime_type,
            created_at: file.created_at,
            is_current: true,
        };
        tx.insert_version(&version)?;

        let account = reservation.charge(&mut *tx)?;
        tx.commit()?;

        info!(
            account = %owner,
            file = %file.id,
            size = version.size,
            storage_used = account.storage_used,
            "uploaded file"
        );
        Ok(UploadReceipt {
            file_id: file.id,
            version,
        })
    }

    /// Register an already-stored blob as the new current content of a file.
    ///
    /// The full size is charged; the superseded version keeps its charge
    /// until the file is deleted. The new version inherits the current
    /// display name.
    pub fn upload_new_version(
        &self,
        file_id: &FileId,
        owner: &AccountId,
        request: NewVersionRequest,
    ) -> EngineResult<FileVersion> {
        let mut tx = self.meta.begin()?;

        let file = owned_file(&mut *tx, file_id, owner)?;
        let reservation = quota::check_and_reserve(&mut *tx, owner, request.size)?;

        let previous = current_version(&mut *tx, &file)?;
        tx.set_current(&previous.id, false)?;

        let version = FileVersion {
            id: VersionId::new(),
            file_id: file.id,
            storage_key: request.storage_key,
            original_name: request.original_name,
            display_name: previous.display_name,
            size: request.size,
            mime_type: request.mime_type,
            created_at: Utc::now(),
            is_current: true,
        };
        tx.insert_version(&version)?;

        let account = reservation.charge(&mut *tx)?;
        tx.commit()?;

        info!(
            account = %owner,
            file = %file.id,
            superseded = %previous.id,
            size = version.size,
            storage_used = account.storage_used,
            "uploaded new version"
        );
        Ok(version)
    }

    /// Change the display name of a file's current version.
    ///
    /// Renaming to the name it already has succeeds without writing.
    pub fn rename(&self, file_id: &FileId, owner: &AccountId, new_name: &str) -> EngineResult<()> {
        let mut tx = self.meta.begin()?;
        let file = owned_file(&mut *tx, file_id, owner)?;
        let current = current_version(&mut *tx, &file)?;
        if current.display_name == new_name {
            debug!(file = %file.id, "rename is a no-op");
            return Ok(());
        }
        tx.set_display_name(&current.id, new_name)?;
        tx.commit()?;
        info!(file = %file.id, from = %current.display_name, to = %new_name, "renamed file");
        Ok(())
    }

    // ---- Reads ----

    /// Live files of `owner` with their current version, newest first.
    pub fn list(&self, owner: &AccountId) -> EngineResult<Vec<FileSummary>> {
        let mut tx = self.meta.begin()?;
        let mut files = tx.live_files(owner)?;
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let mut summaries = Vec::with_capacity(files.len());
        for file in &files {
            let current = current_version(&mut *tx, file)?;
            summaries.push(FileSummary {
                id: file.id,
                display_name: current.display_name,
                size: current.size,
                mime_type: current.mime_type,
                created_at: file.created_at,
            });
        }
        debug!(account = %owner, files = summaries.len(), "listed files");
        Ok(summaries)
    }

    /// Full version history of a file, newest first.
    pub fn versions(&self, file_id: &FileId, owner: &AccountId) -> EngineResult<Vec<FileVersion>> {
        let mut tx = self.meta.begin()?;
        let file = owned_file(&mut *tx, file_id, owner)?;
        let mut versions = tx.versions(&file.id)?;
        versions.reverse();
        Ok(versions)
    }

    /// Locate the current content of a file for streaming.
    pub fn resolve_for_download(
        &self,
        file_id: &FileId,
        owner: &AccountId,
    ) -> EngineResult<DownloadTarget> {
        let mut tx = self.meta.begin()?;
        let file = owned_file(&mut *tx, file_id, owner)?;
        let current = current_version(&mut *tx, &file)?;
        Ok(DownloadTarget {
            storage_key: current.storage_key,
            display_name: current.display_name,
            mime_type: current.mime_type,
            size: current.size,
        })
    }

    /// Resolve a file and locate the blob holding its current content, so
    /// the caller can stream it without buffering.
    ///
    /// A committed version whose blob is missing is an integrity violation.
    pub fn open_download(
        &self,
        file_id: &FileId,
        owner: &AccountId,
    ) -> EngineResult<(DownloadTarget, BlobLocation)> {
        let target = self.resolve_for_download(file_id, owner)?;
        match self.blobs.resolve(&target.storage_key) {
            Ok(location) => Ok((target, location)),
            Err(BlobError::NotFound(key)) => Err(EngineError::IntegrityViolation(format!(
                "blob {key} of file {file_id} is missing"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    // ---- Deletes ----

    /// Delete one file and all of its versions.
    pub fn delete(&self, file_id: &FileId, owner: &AccountId) -> EngineResult<DeleteReport> {
        let report = self.delete_files(std::slice::from_ref(file_id), owner)?;
        if report.deleted_ids.is_empty() {
            return Err(EngineError::NotFoundOrForbidden);
        }
        Ok(report)
    }

    /// Delete every listed file the caller owns.
    ///
    /// Ids that are missing, already deleted, or owned by someone else are
    /// skipped rather than failing the batch; compare `deleted_ids` with the
    /// request to find them.
    pub fn bulk_delete(&self, file_ids: &[FileId], owner: &AccountId) -> EngineResult<DeleteReport> {
        self.delete_files(file_ids, owner)
    }

    fn delete_files(&self, file_ids: &[FileId], owner: &AccountId) -> EngineResult<DeleteReport> {
        let mut seen = HashSet::new();
        let mut tx = self.meta.begin()?;

        let mut deleted_ids = Vec::new();
        let mut keys = Vec::new();
        let mut bytes_freed: u64 = 0;
        for file_id in file_ids.iter().filter(|id| seen.insert(**id)) {
            let Ownership::Found(file) = Ownership::check(&mut *tx, file_id, owner)? else {
                debug!(file = %file_id, "skipping file not deletable by caller");
                continue;
            };
            for version in tx.versions(&file.id)? {
                bytes_freed = bytes_freed.checked_add(version.size).ok_or_else(|| {
                    EngineError::IntegrityViolation(format!("version sizes of {} overflow", file.id))
                })?;
                keys.push(version.storage_key);
            }
            deleted_ids.push(file.id);
        }

        if deleted_ids.is_empty() {
            return Ok(DeleteReport::default());
        }

        let now = Utc::now();
        for file_id in &deleted_ids {
            tx.mark_deleted(file_id, now)?;
        }
        let account = quota::release(&mut *tx, owner, bytes_freed)?;
        tx.commit()?;

        info!(
            account = %owner,
            files = deleted_ids.len(),
            bytes_freed,
            storage_used = account.storage_used,
            "deleted files"
        );

        let blob_failures = self.remove_blobs(&keys);
        Ok(DeleteReport {
            bytes_freed,
            deleted_ids,
            blob_failures,
        })
    }

    /// Best-effort removal of blobs released by a committed transaction.
    fn remove_blobs(&self, keys: &[StorageKey]) -> Vec<StorageKey> {
        let mut failures = Vec::new();
        for key in keys {
            match self.blobs.delete(key) {
                Ok(true) => {}
                Ok(false) => debug!(%key, "blob already absent"),
                Err(e) => {
                    warn!(%key, error = %e, "blob removal failed after commit; left as orphan");
                    failures.push(key.clone());
                }
            }
        }
        failures
    }

    // ---- Caller-side helpers ----

    /// Store `data` and register it as a new file.
    ///
    /// If registration fails the freshly written blob is deleted again
    /// before the error is returned.
    pub fn ingest(
        &self,
        owner: &AccountId,
        original_name: &str,
        mime_type: &str,
        data: &[u8],
        display_name: Option<&str>,
    ) -> EngineResult<UploadReceipt> {
        let storage_key = self.blobs.put(data, original_name)?;
        self.upload(UploadRequest {
            owner_id: *owner,
            original_name: original_name.to_string(),
            storage_key: storage_key.clone(),
            size: data.len() as u64,
            mime_type: mime_type.to_string(),
            display_name: display_name.map(str::to_string),
        })
        .inspect_err(|_| self.discard_blob(&storage_key))
    }

    /// Store `data` and register it as the new current version of a file.
    pub fn ingest_new_version(
        &self,
        file_id: &FileId,
        owner: &AccountId,
        original_name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> EngineResult<FileVersion> {
        let storage_key = self.blobs.put(data, original_name)?;
        self.upload_new_version(
            file_id,
            owner,
            NewVersionRequest {
                storage_key: storage_key.clone(),
                original_name: original_name.to_string(),
                size: data.len() as u64,
                mime_type: mime_type.to_string(),
            },
        )
        .inspect_err(|_| self.discard_blob(&storage_key))
    }

    fn discard_blob(&self, key: &StorageKey) {
        if let Err(e) = self.blobs.delete(key) {
            warn!(%key, error = %e, "could not remove blob of failed upload; left as orphan");
        }
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
