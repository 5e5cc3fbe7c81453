//! HTTP request handlers.
//!
//! Every processing route reads the form, turns its fields into a
//! [`PipelineSpec`] and hands off to [`handle_upload`]; the routes differ only
//! in how they build the spec.

use super::form::UploadForm;
use super::response::{artifact_response, ApiError, HealthResponse};
use super::AppState;
use crate::output::ResultArtifact;
use crate::process::process_document;
use crate::steps::{
    PipelineSpec, PipelineStep, StepParams, DEFAULT_BINARIZE_THRESHOLD, DEFAULT_DENOISE_LEVEL,
    DEFAULT_ENHANCE_FACTOR, OCR_DENOISE_LEVEL, OCR_ENHANCE_FACTOR,
};
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, info};

type MultipartResult = Result<Multipart, MultipartRejection>;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `POST /api/preprocess`: the default pipeline.
pub async fn preprocess(State(state): State<AppState>, multipart: MultipartResult) -> Response {
    handle_upload(state, "preprocess", multipart, |_| {
        PipelineSpec::default_pipeline()
    })
    .await
}

/// `POST /api/preprocess/binarize`: form field `threshold` (default 128).
pub async fn binarize(State(state): State<AppState>, multipart: MultipartResult) -> Response {
    handle_upload(state, "binarize", multipart, |form| {
        let threshold = form.int_or("threshold", DEFAULT_BINARIZE_THRESHOLD);
        PipelineSpec::single(PipelineStep::Binarize(Some(threshold)))
    })
    .await
}

/// `POST /api/preprocess/deskew`
pub async fn deskew(State(state): State<AppState>, multipart: MultipartResult) -> Response {
    handle_upload(state, "deskew", multipart, |_| {
        PipelineSpec::single(PipelineStep::Deskew)
    })
    .await
}

/// `POST /api/preprocess/denoise`: form field `level` (default 1).
pub async fn denoise(State(state): State<AppState>, multipart: MultipartResult) -> Response {
    handle_upload(state, "denoise", multipart, |form| {
        let level = form.int_or("level", DEFAULT_DENOISE_LEVEL);
        PipelineSpec::single(PipelineStep::Denoise(Some(level)))
    })
    .await
}

/// `POST /api/preprocess/enhance`: form field `factor` (default 2.0).
pub async fn enhance(State(state): State<AppState>, multipart: MultipartResult) -> Response {
    handle_upload(state, "enhance", multipart, |form| {
        let factor = form.float_or("factor", DEFAULT_ENHANCE_FACTOR);
        PipelineSpec::single(PipelineStep::EnhanceContrast(Some(factor)))
    })
    .await
}

/// `POST /api/preprocess/pipeline`: repeated `steps` fields plus an optional JSON
/// `params` object. No recognisable steps means the default pipeline.
pub async fn pipeline(State(state): State<AppState>, multipart: MultipartResult) -> Response {
    handle_upload(state, "pipeline", multipart, |form| {
        let params = form
            .text("params")
            .map(StepParams::from_json_lenient)
            .unwrap_or_default();
        PipelineSpec::from_named_steps(form.values("steps"), &params)
    })
    .await
}

/// `POST /api/preprocess/google_vision`: deskew, enhance, denoise, tuned for cloud OCR.
/// Form fields `enhance_factor` (default 1.5) and `denoise_level` (default 1).
pub async fn google_vision(State(state): State<AppState>, multipart: MultipartResult) -> Response {
    handle_upload(state, "google_vision", multipart, |form| {
        PipelineSpec::ocr_optimized(
            form.float_or("enhance_factor", OCR_ENHANCE_FACTOR),
            form.int_or("denoise_level", OCR_DENOISE_LEVEL),
        )
    })
    .await
}

/// Shared body of every processing route.
async fn handle_upload<F>(
    state: AppState,
    route: &'static str,
    multipart: MultipartResult,
    build_spec: F,
) -> Response
where
    F: FnOnce(&UploadForm) -> PipelineSpec,
{
    match run_upload(&state, route, multipart, build_spec).await {
        Ok(artifact) => artifact_response(artifact),
        Err(e) => e.into_response(),
    }
}

async fn run_upload<F>(
    state: &AppState,
    route: &'static str,
    multipart: MultipartResult,
    build_spec: F,
) -> Result<ResultArtifact, ApiError>
where
    F: FnOnce(&UploadForm) -> PipelineSpec,
{
    // A request that is not multipart at all carries no upload.
    let multipart = multipart.map_err(|rejection| {
        debug!(route, rejection = %rejection, "Request is not multipart");
        ApiError::from(crate::error::ScanPrepError::MissingInput)
    })?;

    let mut form = UploadForm::from_multipart(multipart).await?;
    let upload = form.take_upload()?;
    let spec = build_spec(&form);
    info!(
        route,
        filename = %upload.filename,
        bytes = upload.bytes.len(),
        steps = %spec.describe(),
        "Processing upload"
    );

    let workspace = state.workspaces.acquire()?;
    let result = process_document(&upload, &spec, &workspace, &state.context).await;
    workspace.release().await;

    Ok(result?.artifact)
}
