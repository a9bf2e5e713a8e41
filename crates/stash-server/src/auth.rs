use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use stash_types::AccountId;

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    Anonymous,
}

impl Credentials {
    /// Extract credentials from an `Authorization: Bearer <token>` header.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or(Self::Anonymous, |t| Self::Bearer(t.to_string()))
    }
}

/// Maps request credentials to the account acting on the engine.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<AccountId>;
}

/// Development adapter: the bearer token is the account id itself.
///
/// Provides no secrecy; put a real identity provider in front of any
/// deployment that is reachable by untrusted clients.
pub struct BearerAccountAuth;

#[async_trait]
impl AuthProvider for BearerAccountAuth {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<AccountId> {
        match credentials {
            Credentials::Bearer(token) => token
                .parse()
                .map_err(|_| ServerError::AuthFailed("bearer token is not an account id".into())),
            Credentials::Anonymous => Err(ServerError::AuthFailed("missing bearer token".into())),
        }
    }
}
