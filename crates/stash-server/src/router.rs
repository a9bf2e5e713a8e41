use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Build the axum router with all Stash endpoints.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route("/v1/storage", get(handler::storage_status))
        .route("/v1/files", get(handler::list_files).post(handler::upload_file))
        .route("/v1/files/bulk-delete", post(handler::bulk_delete))
        .route(
            "/v1/files/:file_id",
            patch(handler::rename_file).delete(handler::delete_file),
        )
        .route("/v1/files/:file_id/content", put(handler::replace_content))
        .route("/v1/files/:file_id/versions", get(handler::list_versions))
        .route("/v1/files/:file_id/download", get(handler::download_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
