use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AccountId, FileId, VersionId};
use crate::key::StorageKey;

/// Stable identity of a user file across content versions.
///
/// Deletion is soft: `deleted_at` is set and the row is kept, but every read
/// path treats a deleted file as absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalFile {
    pub id: FileId,
    pub owner_id: AccountId,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LogicalFile {
    /// A new, live file owned by `owner_id`.
    pub fn new(owner_id: AccountId) -> Self {
        Self {
            id: FileId::new(),
            owner_id,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Returns `true` once the file has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns `true` if the file is live and owned by `owner`.
    pub fn is_live_for(&self, owner: &AccountId) -> bool {
        !self.is_deleted() && self.owner_id == *owner
    }
}

/// One content revision of a [`LogicalFile`].
///
/// Immutable after insert except for `is_current` and `display_name`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub id: VersionId,
    pub file_id: FileId,
    pub storage_key: StorageKey,
    /// Name the content was uploaded under.
    pub original_name: String,
    /// User-facing name; the only field a rename touches.
    pub display_name: String,
    pub size: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub is_current: bool,
}
