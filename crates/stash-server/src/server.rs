use std::sync::Arc;

use tokio::net::TcpListener;

use crate::auth::BearerAccountAuth;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::build_router;
use crate::state::AppState;

/// Stash HTTP server.
pub struct StashServer {
    config: ServerConfig,
    state: AppState,
}

impl StashServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Open the engine under `config.data_dir` with bearer-token auth.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let engine = stash_engine::open_data_dir(&config.data_dir, config.engine.clone())?;
        let state = AppState::new(Arc::new(engine), Arc::new(BearerAccountAuth));
        Ok(Self::new(config, state))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone(), self.config.max_upload_bytes)
    }

    /// Serve requests until Ctrl-C.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!("stash server listening on {}", self.config.bind_addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_opens_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let server = StashServer::open(config).unwrap();
        assert_eq!(server.config().bind_addr.port(), 8080);
        assert!(dir.path().join(stash_engine::local::BLOB_DIR).is_dir());
        let _router = server.router();
    }
}
