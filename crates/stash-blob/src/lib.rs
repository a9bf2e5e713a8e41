//! Blob storage for Stash.
//!
//! A blob store is durable byte storage addressed by an opaque
//! [`StorageKey`](stash_types::StorageKey). It has no transactional join with
//! the metadata store, so the engine orders its calls around it: blobs are
//! written before the metadata transaction that references them and deleted
//! only after the transaction that releases them has committed.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`InMemoryBlobStore`] -- `HashMap`-based store for tests and embedding
//! - [`LocalBlobStore`] -- one file per key under a root directory
//!
//! # Design Rules
//!
//! 1. A key handed out by `put` always refers to a complete blob.
//! 2. Blobs are never modified in place; new content gets a new key.
//! 3. `delete` is idempotent: removing an absent key is not an error.
//! 4. The store never interprets blob contents.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod local;
pub mod memory;
pub mod traits;

pub use error::{BlobError, BlobResult};
pub use local::LocalBlobStore;
pub use memory::InMemoryBlobStore;
pub use traits::{BlobInfo, BlobLocation, BlobStore};
