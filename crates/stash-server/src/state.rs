use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use stash_engine::StorageEngine;
use stash_types::AccountId;

use crate::auth::{AuthProvider, Credentials};
use crate::error::ServerError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<StorageEngine>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    pub fn new(engine: Arc<StorageEngine>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { engine, auth }
    }
}

/// The authenticated account making the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller(pub AccountId);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let credentials = Credentials::from_headers(&parts.headers);
        let account = state.auth.authenticate(&credentials).await?;
        Ok(Caller(account))
    }
}
