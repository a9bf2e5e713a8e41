use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use stash_blob::BlobLocation;
use stash_engine::{
    DeleteReport, EngineError, EngineResult, FileSummary, StorageEngine, StorageStatus,
    UploadReceipt,
};
use stash_types::{FileId, FileVersion};
use tokio::io::AsyncReadExt;

use crate::error::{ServerError, ServerResult};
use crate::extract::{FileIdPath, JsonBody, QueryParams};
use crate::state::{AppState, Caller};

const OCTET_STREAM: &str = "application/octet-stream";

/// Read size for streamed downloads.
const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// Run an engine call on the blocking pool.
async fn run<T, F>(state: &AppState, f: F) -> ServerResult<T>
where
    F: FnOnce(&StorageEngine) -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    let result = tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| ServerError::Internal(format!("engine task failed: {e}")))?;
    Ok(result?)
}

fn mime_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

fn required_name(name: Option<String>) -> ServerResult<String> {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ServerError::BadRequest("missing `name` query parameter".into()))
}

fn content_disposition(display_name: &str) -> HeaderValue {
    let safe: String = display_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn file_chunks(file: tokio::fs::File) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(DOWNLOAD_CHUNK);
        let read = file.read_buf(&mut buf).await?;
        Ok::<_, io::Error>((read > 0).then(|| (buf.freeze(), file)))
    })
}

/// Response body reading the blob at `location`.
async fn blob_body(location: BlobLocation) -> ServerResult<Body> {
    match location {
        BlobLocation::Memory(buf) => Ok(Body::from(buf.to_vec())),
        BlobLocation::Path(path) => match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Body::from_stream(file_chunks(file))),
            // Deleted between resolve and open.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(EngineError::NotFoundOrForbidden.into())
            }
            Err(e) => Err(e.into()),
        },
    }
}

/// Health check handler.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Info handler.
pub async fn info_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": "stash-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn storage_status(
    State(state): State<AppState>,
    Caller(owner): Caller,
) -> ServerResult<Json<StorageStatus>> {
    let status = run(&state, move |e| e.storage_status(&owner)).await?;
    Ok(Json(status))
}

pub async fn list_files(
    State(state): State<AppState>,
    Caller(owner): Caller,
) -> ServerResult<Json<Vec<FileSummary>>> {
    let files = run(&state, move |e| e.list(&owner)).await?;
    Ok(Json(files))
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub name: Option<String>,
    pub display_name: Option<String>,
}

pub async fn upload_file(
    State(state): State<AppState>,
    Caller(owner): Caller,
    QueryParams(params): QueryParams<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<(StatusCode, Json<UploadReceipt>)> {
    let name = required_name(params.name)?;
    let mime = mime_type(&headers);
    let receipt = run(&state, move |e| {
        e.ingest(&owner, &name, &mime, &body, params.display_name.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct ReplaceParams {
    pub name: Option<String>,
}

pub async fn replace_content(
    State(state): State<AppState>,
    Caller(owner): Caller,
    FileIdPath(file_id): FileIdPath,
    QueryParams(params): QueryParams<ReplaceParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<(StatusCode, Json<FileVersion>)> {
    let name = required_name(params.name)?;
    let mime = mime_type(&headers);
    let version = run(&state, move |e| {
        e.ingest_new_version(&file_id, &owner, &name, &mime, &body)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub display_name: String,
}

pub async fn rename_file(
    State(state): State<AppState>,
    Caller(owner): Caller,
    FileIdPath(file_id): FileIdPath,
    JsonBody(request): JsonBody<RenameRequest>,
) -> ServerResult<StatusCode> {
    let name = request.display_name.trim().to_string();
    if name.is_empty() {
        return Err(ServerError::BadRequest("display name must not be empty".into()));
    }
    run(&state, move |e| e.rename(&file_id, &owner, &name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_file(
    State(state): State<AppState>,
    Caller(owner): Caller,
    FileIdPath(file_id): FileIdPath,
) -> ServerResult<Json<DeleteReport>> {
    let report = run(&state, move |e| e.delete(&file_id, &owner)).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub file_ids: Vec<FileId>,
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    Caller(owner): Caller,
    JsonBody(request): JsonBody<BulkDeleteRequest>,
) -> ServerResult<Json<DeleteReport>> {
    let report = run(&state, move |e| e.bulk_delete(&request.file_ids, &owner)).await?;
    Ok(Json(report))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Caller(owner): Caller,
    FileIdPath(file_id): FileIdPath,
) -> ServerResult<Json<Vec<FileVersion>>> {
    let versions = run(&state, move |e| e.versions(&file_id, &owner)).await?;
    Ok(Json(versions))
}

pub async fn download_file(
    State(state): State<AppState>,
    Caller(owner): Caller,
    FileIdPath(file_id): FileIdPath,
) -> ServerResult<Response> {
    let (target, location) = run(&state, move |e| e.open_download(&file_id, &owner)).await?;
    let body = blob_body(location).await?;
    let content_type = HeaderValue::from_str(&target.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM));
    let headers = [
        (header::CONTENT_TYPE, content_type),
        (header::CONTENT_LENGTH, HeaderValue::from(target.size)),
        (header::CONTENT_DISPOSITION, content_disposition(&target.display_name)),
    ];
    Ok((headers, body).into_response())
}
