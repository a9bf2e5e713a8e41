use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use stash_types::StorageKey;

use crate::error::BlobResult;

/// Where the bytes of a blob can be streamed from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlobLocation {
    /// Absolute path of a file holding the blob.
    Path(PathBuf),
    /// Shared in-memory buffer holding the blob.
    Memory(Arc<[u8]>),
}

impl BlobLocation {
    /// Open the blob for sequential reading.
    pub fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            Self::Path(path) => Ok(Box::new(File::open(path)?)),
            Self::Memory(buf) => Ok(Box::new(Cursor::new(Arc::clone(buf)))),
        }
    }
}

/// Listing entry returned by [`BlobStore::list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobInfo {
    pub key: StorageKey,
    pub size: u64,
    /// When the blob was written.
    pub stored_at: DateTime<Utc>,
}

/// Durable byte storage addressed by opaque keys.
///
/// All implementations must satisfy these invariants:
/// - `put` returns only after the bytes are durable under the returned key.
/// - A key is never reused for different content.
/// - `delete` is idempotent.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlobStore: Send + Sync {
    /// Store `data` under a fresh key and return it.
    ///
    /// `name_hint` is the client-side file name; backends may use it to
    /// derive a key suffix, nothing more.
    fn put(&self, data: &[u8], name_hint: &str) -> BlobResult<StorageKey>;

    /// Read a blob. Returns `Ok(None)` if nothing is stored under `key`.
    fn read(&self, key: &StorageKey) -> BlobResult<Option<Vec<u8>>>;

    /// Delete a blob. Returns `true` if the blob existed.
    fn delete(&self, key: &StorageKey) -> BlobResult<bool>;

    /// Resolve a key to a location the bytes can be streamed from.
    ///
    /// Returns `Err(BlobError::NotFound)` if the blob does not exist.
    fn resolve(&self, key: &StorageKey) -> BlobResult<BlobLocation>;

    /// Check whether a blob exists.
    fn exists(&self, key: &StorageKey) -> BlobResult<bool>;

    /// List every blob in the store.
    fn list(&self) -> BlobResult<Vec<BlobInfo>>;

    /// Delete several blobs, stopping at the first error.
    ///
    /// Returns how many of the keys existed.
    fn delete_batch(&self, keys: &[StorageKey]) -> BlobResult<usize> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
