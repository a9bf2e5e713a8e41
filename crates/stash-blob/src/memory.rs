use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use stash_types::StorageKey;

use crate::error::{BlobError, BlobResult};
use crate::traits::{BlobInfo, BlobLocation, BlobStore};

struct Entry {
    data: Arc<[u8]>,
    stored_at: DateTime<Utc>,
}

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock` as
/// shared buffers, so [`BlobStore::resolve`] is a cheap clone.
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<StorageKey, Entry>>,
    read_only: AtomicBool,
}

impl InMemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            read_only: AtomicBool::new(false),
        }
    }

    /// Toggle read-only mode. While set, `put` and `delete` fail with
    /// [`BlobError::ReadOnly`]; reads keep working.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `data` under an explicit key with an explicit write time.
    ///
    /// Used to stage pre-existing blobs, e.g. aged orphans in sweep tests.
    pub fn insert_at(&self, key: StorageKey, data: &[u8], stored_at: DateTime<Utc>) -> BlobResult<()> {
        self.check_writable()?;
        self.write_map()?.insert(
            key,
            Entry {
                data: Arc::from(data),
                stored_at,
            },
        );
        Ok(())
    }

    fn check_writable(&self) -> BlobResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(BlobError::ReadOnly);
        }
        Ok(())
    }

    fn read_map(&self) -> BlobResult<RwLockReadGuard<'_, HashMap<StorageKey, Entry>>> {
        self.blobs
            .read()
            .map_err(|e| BlobError::Poisoned(e.to_string()))
    }

    fn write_map(&self) -> BlobResult<RwLockWriteGuard<'_, HashMap<StorageKey, Entry>>> {
        self.blobs
            .write()
            .map_err(|e| BlobError::Poisoned(e.to_string()))
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, data: &[u8], name_hint: &str) -> BlobResult<StorageKey> {
        self.check_writable()?;
        let mut map = self.write_map()?;
        let mut key = StorageKey::generate(name_hint);
        while map.contains_key(&key) {
            key = StorageKey::generate(name_hint);
        }
        map.insert(
            key.clone(),
            Entry {
                data: Arc::from(data),
                stored_at: Utc::now(),
            },
        );
        Ok(key)
    }

    fn read(&self, key: &StorageKey) -> BlobResult<Option<Vec<u8>>> {
        Ok(self.read_map()?.get(key).map(|e| e.data.to_vec()))
    }

    fn delete(&self, key: &StorageKey) -> BlobResult<bool> {
        self.check_writable()?;
        Ok(self.write_map()?.remove(key).is_some())
    }

    fn resolve(&self, key: &StorageKey) -> BlobResult<BlobLocation> {
        self.read_map()?
            .get(key)
            .map(|e| BlobLocation::Memory(Arc::clone(&e.data)))
            .ok_or_else(|| BlobError::NotFound(key.clone()))
    }

    fn exists(&self, key: &StorageKey) -> BlobResult<bool> {
        Ok(self.read_map()?.contains_key(key))
    }

    fn list(&self) -> BlobResult<Vec<BlobInfo>> {
        let map = self.read_map()?;
        let mut infos: Vec<BlobInfo> = map
            .iter()
            .map(|(key, e)| BlobInfo {
                key: key.clone(),
                size: e.data.len() as u64,
                stored_at: e.stored_at,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .field("read_only", &self.read_only.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn put_and_read() {
        let store = InMemoryBlobStore::new();
        let key = store.put(b"hello world", "hello.txt").unwrap();
        assert!(key.as_str().ends_with(".txt"));

        let data = store.read(&key).unwrap().expect("should exist");
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn identical_content_gets_distinct_keys() {
        let store = InMemoryBlobStore::new();
        let a = store.put(b"same", "a.bin").unwrap();
        let b = store.put(b"same", "a.bin").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn read_missing_returns_none() {
        let store = InMemoryBlobStore::new();
        let key = StorageKey::parse("missing").unwrap();
        assert!(store.read(&key).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Exists / Delete
    // -----------------------------------------------------------------------

    #[test]
    fn delete_is_idempotent() {
        let store = InMemoryBlobStore::new();
        let key = store.put(b"to-delete", "x").unwrap();
        assert!(store.delete(&key).unwrap());
        assert!(!store.exists(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
    }

    #[test]
    fn delete_batch_counts_existing() {
        let store = InMemoryBlobStore::new();
        let a = store.put(b"a", "a").unwrap();
        let b = store.put(b"b", "b").unwrap();
        let ghost = StorageKey::parse("ghost").unwrap();
        assert_eq!(store.delete_batch(&[a, ghost, b]).unwrap(), 2);
        assert!(store.is_empty());
    }

    // -----------------------------------------------------------------------
    // Resolve / List
    // -----------------------------------------------------------------------

    #[test]
    fn resolve_shares_buffer() {
        let store = InMemoryBlobStore::new();
        let key = store.put(b"stream me", "s.txt").unwrap();
        match store.resolve(&key).unwrap() {
            BlobLocation::Memory(buf) => assert_eq!(&buf[..], b"stream me"),
            other => panic!("unexpected location {other:?}"),
        }

        let mut streamed = String::new();
        store
            .resolve(&key)
            .unwrap()
            .reader()
            .unwrap()
            .read_to_string(&mut streamed)
            .unwrap();
        assert_eq!(streamed, "stream me");
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let store = InMemoryBlobStore::new();
        let key = StorageKey::parse("nope").unwrap();
        assert!(matches!(store.resolve(&key), Err(BlobError::NotFound(_))));
    }

    #[test]
    fn list_reports_sizes_sorted() {
        let store = InMemoryBlobStore::new();
        store.put(b"12345", "a").unwrap();
        store.put(b"123456789", "b").unwrap();
        let infos = store.list().unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos[0].key <= infos[1].key);
        assert_eq!(infos.iter().map(|i| i.size).sum::<u64>(), 14);
    }

    #[test]
    fn insert_at_keeps_timestamp() {
        let store = InMemoryBlobStore::new();
        let when = Utc::now() - chrono::Duration::days(2);
        let key = StorageKey::parse("old-blob").unwrap();
        store.insert_at(key.clone(), b"old", when).unwrap();
        let infos = store.list().unwrap();
        assert_eq!(infos[0].key, key);
        assert_eq!(infos[0].stored_at, when);
    }

    // -----------------------------------------------------------------------
    // Read-only mode
    // -----------------------------------------------------------------------

    #[test]
    fn read_only_rejects_writes() {
        let store = InMemoryBlobStore::new();
        let key = store.put(b"kept", "k").unwrap();
        store.set_read_only(true);
        assert!(matches!(store.put(b"x", "x"), Err(BlobError::ReadOnly)));
        assert!(matches!(store.delete(&key), Err(BlobError::ReadOnly)));
        assert_eq!(store.read(&key).unwrap().unwrap(), b"kept");

        store.set_read_only(false);
        assert!(store.delete(&key).unwrap());
    }

    // -----------------------------------------------------------------------
    // Concurrency / Debug
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_puts_are_safe() {
        use std::thread;

        let store = Arc::new(InMemoryBlobStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.put(format!("blob {i}").as_bytes(), "c.bin").unwrap()
                })
            })
            .collect();

        for h in handles {
            let key = h.join().expect("thread should not panic");
            assert!(store.exists(&key).unwrap());
        }
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn debug_format() {
        let store = InMemoryBlobStore::new();
        store.put(b"x", "x").unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryBlobStore"));
        assert!(debug.contains("blob_count"));
    }
}
