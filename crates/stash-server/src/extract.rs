//! Request extractors whose rejections render as [`ServerError`] JSON.
//!
//! axum's own `Path`, `Query` and `Json` reject with plain-text bodies;
//! these wrappers delegate to them and turn the rejection into
//! [`ServerError::BadRequest`].

use async_trait::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;
use stash_types::FileId;

use crate::error::ServerError;

/// The `{id}` segment of a file route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileIdPath(pub FileId);

#[async_trait]
impl<S> FromRequestParts<S> for FileIdPath
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<FileId>::from_request_parts(parts, state)
            .await
            .map_err(|e| ServerError::BadRequest(e.body_text()))?;
        Ok(Self(id))
    }
}

/// Deserialized query string.
#[derive(Debug)]
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ServerError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Deserialized JSON request body.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ServerError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}
