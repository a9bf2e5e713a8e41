//! Inputs and results of engine operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stash_types::{AccountId, FileId, FileVersion, StorageKey};

/// A completed blob to register as a brand-new logical file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRequest {
    pub owner_id: AccountId,
    pub original_name: String,
    /// Key of a blob that is already durable in the blob store.
    pub storage_key: StorageKey,
    pub size: u64,
    pub mime_type: String,
    /// Defaults to `original_name`.
    pub display_name: Option<String>,
}

/// A completed blob to register as the new current content of a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewVersionRequest {
    pub storage_key: StorageKey,
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
}

/// Result of [`StorageEngine::upload`](crate::StorageEngine::upload).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub file_id: FileId,
    pub version: FileVersion,
}

/// One row of a file listing: a live file and its current version's
/// display metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: FileId,
    pub display_name: String,
    pub size: u64,
    pub mime_type: String,
    /// Creation time of the logical file, not of the current version.
    pub created_at: DateTime<Utc>,
}

/// What a download needs to stream a file's current content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTarget {
    pub storage_key: StorageKey,
    pub display_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Result of a single or bulk delete.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    /// Bytes credited back to the account.
    pub bytes_freed: u64,
    /// Files actually deleted, in request order. Requested ids that did not
    /// match a live file of the caller are absent.
    pub deleted_ids: Vec<FileId>,
    /// Blobs whose removal failed after the metadata commit. They are
    /// orphans now and will be collected by the sweep.
    pub blob_failures: Vec<StorageKey>,
}

/// An account's quota position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStatus {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
}

/// Result of an orphan sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Blobs inspected.
    pub scanned: usize,
    /// Unreferenced blobs older than the grace period.
    pub orphans: Vec<StorageKey>,
    /// Orphans actually deleted (0 on a dry run).
    pub removed: usize,
    pub dry_run: bool,
}
