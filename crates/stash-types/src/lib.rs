//! Foundation types for Stash.
//!
//! Every other Stash crate depends on `stash-types`. The records here mirror
//! the rows of the metadata store; they carry no behaviour beyond small
//! accessors, all lifecycle rules live in `stash-engine`.
//!
//! # Key Types
//!
//! - [`AccountId`], [`FileId`], [`VersionId`] -- UUID v7 identifiers
//! - [`StorageKey`] -- opaque blob locator handed out by a blob store
//! - [`Account`] -- quota holder with a running `storage_used` counter
//! - [`LogicalFile`] -- stable, soft-deletable file identity
//! - [`FileVersion`] -- one content revision of a logical file

pub mod account;
pub mod error;
pub mod file;
pub mod id;
pub mod key;

pub use account::Account;
pub use error::TypeError;
pub use file::{FileVersion, LogicalFile};
pub use id::{AccountId, FileId, VersionId};
pub use key::StorageKey;
