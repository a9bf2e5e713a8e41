use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use stash_types::StorageKey;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{BlobError, BlobResult};
use crate::traits::{BlobInfo, BlobLocation, BlobStore};

/// Attempts at finding an unused key before giving up.
const MAX_KEY_ATTEMPTS: usize = 8;

/// Blob store keeping one file per key under a root directory.
///
/// Writes land in a temp file inside the root (dot-prefixed, so never
/// mistaken for a blob), are fsynced, and are then renamed onto the final
/// key without clobbering. A crash mid-write leaves at worst a stray temp
/// file, never a truncated blob under a real key.
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> BlobResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        debug!(root = %root.display(), "opened local blob store");
        Ok(Self { root })
    }

    /// Absolute root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.as_str())
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, data: &[u8], name_hint: &str) -> BlobResult<StorageKey> {
        let mut staged = NamedTempFile::new_in(&self.root)?;
        staged.write_all(data)?;
        staged.as_file().sync_all()?;

        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = StorageKey::generate(name_hint);
            match staged.persist_noclobber(self.path_for(&key)) {
                Ok(_) => {
                    debug!(%key, size = data.len(), "stored blob");
                    return Ok(key);
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    staged = e.file;
                }
                Err(e) => return Err(e.error.into()),
            }
        }

        Err(BlobError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not find an unused storage key",
        )))
    }

    fn read(&self, key: &StorageKey) -> BlobResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &StorageKey) -> BlobResult<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve(&self, key: &StorageKey) -> BlobResult<BlobLocation> {
        let path = self.path_for(key);
        if path.is_file() {
            Ok(BlobLocation::Path(path))
        } else {
            Err(BlobError::NotFound(key.clone()))
        }
    }

    fn exists(&self, key: &StorageKey) -> BlobResult<bool> {
        Ok(self.path_for(key).is_file())
    }

    fn list(&self) -> BlobResult<Vec<BlobInfo>> {
        let mut infos = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %entry.path().display(), "skipping non-UTF-8 file in blob root");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let key = StorageKey::parse(name)?;
            infos.push(BlobInfo {
                key,
                size: meta.len(),
                stored_at: DateTime::<Utc>::from(meta.modified()?),
            });
        }
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn temp_store() -> (tempfile::TempDir, LocalBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::open(dir.path().join("blobs")).unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_root() {
        let (dir, store) = temp_store();
        assert!(store.root().is_dir());
        assert!(store.root().starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn put_read_delete() {
        let (_dir, store) = temp_store();
        let key = store.put(b"on disk", "notes.md").unwrap();
        assert!(key.as_str().ends_with(".md"));
        assert_eq!(store.read(&key).unwrap().unwrap(), b"on disk");

        assert!(store.delete(&key).unwrap());
        assert!(store.read(&key).unwrap().is_none());
        assert!(!store.delete(&key).unwrap());
    }

    #[test]
    fn resolve_returns_absolute_path() {
        let (_dir, store) = temp_store();
        let key = store.put(b"stream", "s.bin").unwrap();
        match store.resolve(&key).unwrap() {
            BlobLocation::Path(path) => {
                assert!(path.is_absolute());
                assert_eq!(fs::read(path).unwrap(), b"stream");
            }
            other => panic!("unexpected location {other:?}"),
        }

        let mut streamed = Vec::new();
        store
            .resolve(&key)
            .unwrap()
            .reader()
            .unwrap()
            .read_to_end(&mut streamed)
            .unwrap();
        assert_eq!(streamed, b"stream");
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let (_dir, store) = temp_store();
        let key = StorageKey::parse("absent.txt").unwrap();
        assert!(matches!(store.resolve(&key), Err(BlobError::NotFound(_))));
        assert!(!store.exists(&key).unwrap());
    }

    #[test]
    fn list_skips_temp_files_and_dirs() {
        let (_dir, store) = temp_store();
        let key = store.put(b"12345", "a.txt").unwrap();
        fs::write(store.root().join(".tmp-partial"), b"half").unwrap();
        fs::create_dir(store.root().join("nested")).unwrap();

        let infos = store.list().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].key, key);
        assert_eq!(infos[0].size, 5);
    }

    #[test]
    fn put_leaves_no_temp_files() {
        let (_dir, store) = temp_store();
        store.put(b"one", "1").unwrap();
        store.put(b"two", "2").unwrap();
        let leftovers = fs::read_dir(store.root())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn reopen_sees_existing_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let key = {
            let store = LocalBlobStore::open(dir.path()).unwrap();
            store.put(b"persisted", "p.txt").unwrap()
        };
        let store = LocalBlobStore::open(dir.path()).unwrap();
        assert_eq!(store.read(&key).unwrap().unwrap(), b"persisted");
    }
}
