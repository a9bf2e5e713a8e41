//! Quota-metered, versioned file storage for Stash.
//!
//! [`StorageEngine`] ties a [`BlobStore`](stash_blob::BlobStore) holding file
//! contents to a [`MetadataStore`](stash_meta::MetadataStore) holding
//! accounts, logical files and their versions. It owns the quota ledger and
//! the soft-delete lifecycle.
//!
//! # Ordering rules
//!
//! 1. Blobs are written before the metadata transaction that references
//!    them. A failed transaction leaves an orphan blob, never a dangling row.
//! 2. Quota is checked and charged inside that same transaction, against a
//!    locked account row.
//! 3. Blobs are deleted only after the transaction that releases them has
//!    committed. A failed removal leaves an orphan for
//!    [`StorageEngine::sweep_orphans`].
//! 4. Files that are missing, deleted, or owned by another account are all
//!    reported as [`EngineError::NotFoundOrForbidden`].

pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod local;
pub mod model;
pub mod quota;
pub mod sweep;

pub use config::{EngineConfig, DEFAULT_STORAGE_LIMIT};
pub use engine::StorageEngine;
pub use error::{EngineError, EngineResult};
pub use guard::Ownership;
pub use local::open_data_dir;
pub use model::{
    DeleteReport, DownloadTarget, FileSummary, NewVersionRequest, StorageStatus, SweepReport,
    UploadReceipt, UploadRequest,
};
