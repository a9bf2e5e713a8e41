//! Transactional metadata storage for Stash.
//!
//! The metadata store holds the three record types of the data model
//! ([`Account`](stash_types::Account), [`LogicalFile`](stash_types::LogicalFile),
//! [`FileVersion`](stash_types::FileVersion)) and is the single source of
//! truth for the engine. Every mutation runs inside a [`MetaTransaction`];
//! dropping a transaction without committing it rolls it back.
//!
//! # Modules
//!
//! - [`error`] -- Error types for metadata operations
//! - [`traits`] -- [`MetadataStore`] and [`MetaTransaction`]
//! - [`memory`] -- [`InMemoryMetadataStore`], process-local, for tests and embedding
//! - [`sqlite`] -- [`SqliteMetadataStore`], a WAL-mode SQLite database file

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{MetaError, MetaResult};
pub use memory::InMemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;
pub use traits::{MetaTransaction, MetadataStore};
