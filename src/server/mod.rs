//! HTTP service.
//!
//! | Route                           | Pipeline                                         |
//! |---------------------------------|--------------------------------------------------|
//! | `/api/preprocess`               | deskew → denoise(1) → binarize(128) → enhance(2) |
//! | `/api/preprocess/binarize`      | binarize(`threshold`)                            |
//! | `/api/preprocess/deskew`        | deskew                                           |
//! | `/api/preprocess/denoise`       | denoise(`level`)                                 |
//! | `/api/preprocess/enhance`       | enhance(`factor`)                                |
//! | `/api/preprocess/pipeline`      | `steps` + `params`                               |
//! | `/api/preprocess/google_vision` | deskew → enhance(1.5) → denoise(1)               |
//!
//! All processing routes are `POST` with a multipart body carrying the upload
//! in `image` or `file`. `GET /health` reports liveness.

mod form;
mod handlers;
mod response;

pub use form::UploadForm;
pub use handlers::health_check;
pub use response::{ApiError, ErrorResponse, HealthResponse};

use crate::config::ServiceConfig;
use crate::error::ScanPrepError;
use crate::process::ProcessContext;
use crate::workspace::WorkspaceManager;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub workspaces: WorkspaceManager,
    pub context: ProcessContext,
}

impl AppState {
    /// Production state: pdfium rasteriser and standard transforms.
    pub fn new(config: ServiceConfig) -> Result<Self, ScanPrepError> {
        let context = ProcessContext::from_config(&config);
        Self::with_context(config, context)
    }

    /// State with caller-supplied backends.
    pub fn with_context(
        config: ServiceConfig,
        context: ProcessContext,
    ) -> Result<Self, ScanPrepError> {
        let workspaces = WorkspaceManager::new(&config.scratch_root, config.keep_workspaces)?;
        Ok(Self {
            config: Arc::new(config),
            workspaces,
            context,
        })
    }
}

/// Build the router with every endpoint.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/preprocess", post(handlers::preprocess))
        .route("/api/preprocess/binarize", post(handlers::binarize))
        .route("/api/preprocess/deskew", post(handlers::deskew))
        .route("/api/preprocess/denoise", post(handlers::denoise))
        .route("/api/preprocess/enhance", post(handlers::enhance))
        .route("/api/preprocess/pipeline", post(handlers::pipeline))
        .route("/api/preprocess/google_vision", post(handlers::google_vision))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `config.bind_addr()` and serve until Ctrl-C.
pub async fn serve(config: ServiceConfig) -> Result<(), ScanPrepError> {
    let addr = config.bind_addr();
    let state = AppState::new(config)?;
    info!(
        addr = %addr,
        scratch_root = %state.workspaces.root().display(),
        keep_workspaces = state.config.keep_workspaces,
        "Starting preprocessing service"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ScanPrepError::io(format!("bind {addr}"), e))?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ScanPrepError::io("serve", e))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
