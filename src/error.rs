//! Error types for the scanprep library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ScanPrepError`] — **Fatal**: the request cannot produce a result
//!   (no upload, undecodable image, broken PDF, unwritable artifact).
//!   Returned as `Err(ScanPrepError)` from [`crate::process`] and mapped to
//!   a `400`/`500` JSON body by the HTTP layer.
//!
//! * [`TransformError`] — **Recoverable**: a single image operation failed.
//!   The [`crate::pipeline::preprocess::Preprocessor`] logs it, keeps the
//!   image as it was before the operation, and moves on to the next step.
//!   It never reaches the caller.
//!
//! Keeping the two apart at the type level means a transform failure cannot
//! accidentally abort a page, and a persistence failure cannot accidentally
//! be swallowed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the scanprep library.
#[derive(Debug, Error)]
pub enum ScanPrepError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The multipart form carried neither an `image` nor a `file` field.
    #[error("No image or PDF provided")]
    MissingInput,

    /// A file field was present but its filename was empty.
    #[error("No file selected")]
    NoFileSelected,

    /// The staged raster could not be opened or decoded.
    #[error("Failed to load image '{path}': {detail}")]
    ImageLoadFailed { path: PathBuf, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium could not open the document or render one of its pages.
    #[error("Error converting PDF to images: {detail}")]
    RasterisationFailed { detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// A processed page could not be written.
    #[error("Failed to save image to '{path}': {detail}")]
    PersistenceFailed { path: PathBuf, detail: String },

    /// The multi-page archive could not be assembled.
    #[error("Failed to build archive '{path}': {detail}")]
    ArchiveFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Scratch-directory or staging I/O failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanPrepError {
    /// Wrap an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ScanPrepError::Io {
            context: context.into(),
            source,
        }
    }

    /// `true` for errors caused by the request itself rather than by
    /// processing. The HTTP layer answers these with `400`.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ScanPrepError::MissingInput | ScanPrepError::NoFileSelected
        )
    }
}

/// A recoverable failure of one image operation.
///
/// Produced by [`crate::pipeline::transform::ImageTransforms`] methods and
/// consumed by the preprocessor, which logs it and skips the step.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformError {
    /// The underlying image routine failed.
    #[error("{step} failed: {detail}")]
    Failed { step: &'static str, detail: String },

    /// The operation was asked to do something it cannot (zero-sized
    /// resize, non-finite factor, ...).
    #[error("{step}: invalid parameter: {detail}")]
    InvalidParameter { step: &'static str, detail: String },

    /// Border removal found no content distinct from the border colour.
    #[error("trim: image is uniform, nothing to keep")]
    NothingToTrim,
}
