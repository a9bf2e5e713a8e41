//! On-disk engine layout used by the CLI and the server.
//!
//! ```text
//! <data_dir>/
//!   blobs/          one file per storage key
//!   metadata.db     SQLite metadata database (WAL mode)
//! ```
//!
//! Several engines, in one process or many, may open the same directory:
//! the database serializes their transactions.

use std::path::Path;
use std::sync::Arc;

use stash_blob::LocalBlobStore;
use stash_meta::SqliteMetadataStore;
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::StorageEngine;
use crate::error::EngineResult;

pub const BLOB_DIR: &str = "blobs";
pub const METADATA_FILE: &str = "metadata.db";

/// Open (creating if needed) an engine rooted at `data_dir`.
pub fn open_data_dir(data_dir: impl AsRef<Path>, config: EngineConfig) -> EngineResult<StorageEngine> {
    let data_dir = data_dir.as_ref();
    let blobs = LocalBlobStore::open(data_dir.join(BLOB_DIR))?;
    let meta = SqliteMetadataStore::open(data_dir.join(METADATA_FILE))?;
    info!(data_dir = %data_dir.display(), "opened storage engine");
    Ok(StorageEngine::new(Arc::new(blobs), Arc::new(meta), config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    use crate::error::EngineError;

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (owner, file_id) = {
            let engine = open_data_dir(dir.path(), EngineConfig::default()).unwrap();
            let owner = engine.provision_account(Some(1000)).unwrap().id;
            let receipt = engine
                .ingest(&owner, "notes.txt", "text/plain", b"hello", None)
                .unwrap();
            (owner, receipt.file_id)
        };

        assert!(dir.path().join(BLOB_DIR).is_dir());
        assert!(dir.path().join(METADATA_FILE).is_file());

        let engine = open_data_dir(dir.path(), EngineConfig::default()).unwrap();
        assert_eq!(engine.storage_status(&owner).unwrap().used, 5);
        let (target, location) = engine.open_download(&file_id, &owner).unwrap();
        assert_eq!(target.display_name, "notes.txt");
        let mut data = Vec::new();
        location.reader().unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn engines_sharing_a_directory_keep_every_commit() {
        let dir = tempfile::tempdir().unwrap();
        let first = open_data_dir(dir.path(), EngineConfig::default()).unwrap();
        let second = open_data_dir(dir.path(), EngineConfig::default()).unwrap();

        let owner = first.provision_account(Some(1000)).unwrap().id;
        let a = first
            .ingest(&owner, "four.bin", "application/octet-stream", b"1234", None)
            .unwrap();
        let b = second
            .ingest(&owner, "six.bin", "application/octet-stream", b"123456", None)
            .unwrap();
        assert_eq!(first.storage_status(&owner).unwrap().used, 10);
        drop((first, second));

        let engine = open_data_dir(dir.path(), EngineConfig::default()).unwrap();
        assert_eq!(engine.storage_status(&owner).unwrap().used, 10);
        let mut listed: Vec<_> = engine.list(&owner).unwrap().into_iter().map(|f| f.id).collect();
        listed.sort();
        let mut expected = vec![a.file_id, b.file_id];
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[test]
    fn quota_holds_across_engines_on_one_directory() {
        let dir = tempfile::tempdir().unwrap();
        let first = open_data_dir(dir.path(), EngineConfig::default()).unwrap();
        let second = open_data_dir(dir.path(), EngineConfig::default()).unwrap();
        let owner = first.provision_account(Some(8)).unwrap().id;

        first.ingest(&owner, "a", "text/plain", b"12345", None).unwrap();
        let err = second.ingest(&owner, "b", "text/plain", b"12345", None).unwrap_err();
        assert!(matches!(err, EngineError::QuotaExceeded { used: 5, .. }), "{err}");
        assert_eq!(second.storage_status(&owner).unwrap().used, 5);
    }

    #[test]
    fn delete_removes_blob_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_data_dir(dir.path(), EngineConfig::default()).unwrap();
        let owner = engine.provision_account(Some(1000)).unwrap().id;
        let receipt = engine.ingest(&owner, "a.bin", "application/octet-stream", b"abc", None).unwrap();

        let blob_path = dir.path().join(BLOB_DIR).join(receipt.version.storage_key.as_str());
        assert!(blob_path.is_file());
        engine.delete(&receipt.file_id, &owner).unwrap();
        assert!(!blob_path.exists());
    }
}
