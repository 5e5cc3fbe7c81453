//! Response bodies and error mapping.

use crate::error::ScanPrepError;
use crate::output::ResultArtifact;
use axum::extract::multipart::MultipartError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Anything a route can fail with.
#[derive(Debug)]
pub enum ApiError {
    /// Processing failed, or the upload itself was missing.
    Processing(ScanPrepError),
    /// The multipart stream could not be read (including oversize bodies).
    Upload { status: StatusCode, message: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Processing(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upload { status, .. } => *status,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Processing(e) => e.to_string(),
            ApiError::Upload { message, .. } => message.clone(),
        }
    }
}

impl From<ScanPrepError> for ApiError {
    fn from(e: ScanPrepError) -> Self {
        ApiError::Processing(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Upload {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "Request rejected");
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// `200` response carrying the processed image or archive.
pub fn artifact_response(artifact: ResultArtifact) -> Response {
    let content_type = artifact.content_type();
    if artifact.is_archive() {
        let disposition = format!("attachment; filename=\"{}\"", artifact.filename());
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            artifact.into_bytes(),
        )
            .into_response()
    } else {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            artifact.into_bytes(),
        )
            .into_response()
    }
}
