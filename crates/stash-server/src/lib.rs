//! HTTP server for Stash.
//!
//! A thin axum adapter over [`StorageEngine`](stash_engine::StorageEngine):
//! every route authenticates the caller, runs one engine operation on the
//! blocking pool, and renders the result or error as JSON.

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

pub use auth::{AuthProvider, BearerAccountAuth, Credentials};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::StashServer;
pub use state::{AppState, Caller};
