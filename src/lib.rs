//! # scanprep
//!
//! Prepare scanned images and PDFs for OCR: deskew, denoise, binarize and
//! contrast enhancement, exposed as an HTTP service and a CLI.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (image or PDF)
//!  │
//!  ├─ 1. Stage    write into a per-request scratch workspace
//!  ├─ 2. Render   PDF pages → PNG at 300 DPI via pdfium (spawn_blocking)
//!  ├─ 3. Steps    deskew / denoise / binarize / enhance / … per page
//!  └─ 4. Package  one page → PNG, several → processed_images.zip
//! ```
//!
//! A step that fails is logged and skipped; the page continues with the
//! image it had before. Only loading, rendering and saving can fail a
//! request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanprep::{process_file, PipelineSpec, ProcessContext, ServiceConfig, WorkspaceManager};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::default();
//!     let workspaces = WorkspaceManager::new(std::env::temp_dir().join("scanprep"), false)?;
//!     let ctx = ProcessContext::from_config(&config);
//!     let stats = process_file(
//!         Path::new("scan.pdf"),
//!         Path::new("processed_images.zip"),
//!         &PipelineSpec::default_pipeline(),
//!         &workspaces,
//!         &ctx,
//!     )
//!     .await?;
//!     eprintln!("{} pages in {}ms", stats.pages, stats.total_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scanprep` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the library to avoid pulling in CLI-only deps:
//! ```toml
//! scanprep = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod server;
pub mod steps;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{ScanPrepError, TransformError};
pub use output::{PageArtifact, ProcessedDocument, ProcessingStats, ResultArtifact};
pub use pipeline::input::{DocumentKind, UploadedDocument};
pub use pipeline::preprocess::Preprocessor;
pub use pipeline::render::{PdfiumRasterizer, Rasterizer};
pub use pipeline::transform::{ImageTransforms, StandardTransforms};
pub use process::{process_document, process_file, run_pipeline, ProcessContext};
pub use progress::{NoopProgressCallback, PageProgressCallback, ProgressCallback};
pub use server::{build_router, serve, AppState};
pub use steps::{PipelineSpec, PipelineStep, StepParams};
pub use workspace::{Workspace, WorkspaceManager};
