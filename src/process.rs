//! Document processing entry points.
//!
//! [`process_document`] is what every HTTP route and the CLI end up calling:
//! stage the upload, rasterise it if it is a PDF, run the step pipeline on
//! each page, and package the result. [`run_pipeline`] is the per-page core
//! and is usable on its own for a single image file.

use crate::config::ServiceConfig;
use crate::error::ScanPrepError;
use crate::output::{PageArtifact, ProcessedDocument, ProcessingStats};
use crate::pipeline::encode;
use crate::pipeline::input::{DocumentKind, UploadedDocument};
use crate::pipeline::preprocess::Preprocessor;
use crate::pipeline::render::{self, PdfiumRasterizer, Rasterizer};
use crate::pipeline::transform::{ImageTransforms, StandardTransforms};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::steps::PipelineSpec;
use crate::workspace::{Workspace, WorkspaceManager};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Everything [`process_document`] needs besides the upload and the steps.
#[derive(Clone)]
pub struct ProcessContext {
    pub transforms: Arc<dyn ImageTransforms>,
    pub rasterizer: Arc<dyn Rasterizer>,
    /// PDF rasterisation resolution.
    pub dpi: u32,
    /// Pages run through the pipeline at once (≥ 1).
    pub page_concurrency: usize,
    pub progress: ProgressCallback,
}

impl ProcessContext {
    /// Production backends (pdfium + standard transforms) configured from
    /// `config`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            transforms: Arc::new(StandardTransforms::new()),
            rasterizer: Arc::new(PdfiumRasterizer::new(config.pdfium_library_path.clone())),
            dpi: config.pdf_dpi,
            page_concurrency: config.page_concurrency.max(1),
            progress: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_transforms(mut self, transforms: Arc<dyn ImageTransforms>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("dpi", &self.dpi)
            .field("page_concurrency", &self.page_concurrency)
            .finish_non_exhaustive()
    }
}

/// Load `source`, apply `spec` (the default pipeline when empty) and write the
/// result to `output`. Blocking.
///
/// Step failures are logged and skipped; only load and save failures are
/// returned.
pub fn run_pipeline(
    source: &Path,
    output: &Path,
    spec: &PipelineSpec,
    transforms: Arc<dyn ImageTransforms>,
) -> Result<PathBuf, ScanPrepError> {
    let mut pre = Preprocessor::open(source, transforms)?;
    for step in spec.resolved() {
        pre.apply_step(&step);
    }
    pre.save(output)
}

/// Process one uploaded document inside `workspace`.
///
/// Raster uploads are a single page. PDFs are rasterised at `ctx.dpi` and
/// every page goes through the same pipeline; pages keep their order in the
/// result regardless of `ctx.page_concurrency`.
#[instrument(skip_all, fields(filename = %upload.filename, steps = %spec.describe()))]
pub async fn process_document(
    upload: &UploadedDocument,
    spec: &PipelineSpec,
    workspace: &Workspace,
    ctx: &ProcessContext,
) -> Result<ProcessedDocument, ScanPrepError> {
    let total_start = Instant::now();

    // ── Step 1: Stage the upload ─────────────────────────────────────────
    let staged = upload.stage(workspace).await?;

    // ── Step 2: Collect page images ──────────────────────────────────────
    let render_start = Instant::now();
    let sources = match staged.kind {
        DocumentKind::RasterImage => vec![staged.path.clone()],
        DocumentKind::Pdf => {
            let pages_dir = workspace.subdir("pages")?;
            let pages = render::rasterize_document(
                Arc::clone(&ctx.rasterizer),
                &staged.path,
                &pages_dir,
                ctx.dpi,
            )
            .await?;
            if pages.is_empty() {
                return Err(ScanPrepError::RasterisationFailed {
                    detail: "document has no pages".into(),
                });
            }
            pages
        }
    };
    let rasterise_ms = match staged.kind {
        DocumentKind::Pdf => render_start.elapsed().as_millis() as u64,
        DocumentKind::RasterImage => 0,
    };
    let total_pages = sources.len();
    info!(pages = total_pages, kind = ?staged.kind, "Pages ready");
    ctx.progress.on_document_start(total_pages);

    // ── Step 3: Run the pipeline on every page ───────────────────────────
    let pipeline_start = Instant::now();
    let out_dir = workspace.subdir("processed")?;
    let pages = run_pages(sources, &out_dir, spec, ctx).await;
    let pipeline_ms = pipeline_start.elapsed().as_millis() as u64;
    let pages = match pages {
        Ok(pages) => {
            ctx.progress.on_document_complete(total_pages, pages.len());
            pages
        }
        Err(e) => {
            ctx.progress.on_document_complete(total_pages, 0);
            return Err(e);
        }
    };

    // ── Step 4: Package ──────────────────────────────────────────────────
    let workspace_dir = workspace.path().to_path_buf();
    let artifact = tokio::task::spawn_blocking(move || encode::package(&pages, &workspace_dir))
        .await
        .map_err(|e| ScanPrepError::Internal(format!("Packaging task panicked: {}", e)))??;

    let stats = ProcessingStats {
        pages: total_pages,
        rasterise_ms,
        pipeline_ms,
        total_ms: total_start.elapsed().as_millis() as u64,
        output_bytes: artifact.bytes().len(),
    };
    info!(
        pages = stats.pages,
        total_ms = stats.total_ms,
        bytes = stats.output_bytes,
        archive = artifact.is_archive(),
        "Document processed"
    );

    Ok(ProcessedDocument { artifact, stats })
}

/// Process a local file and write the result to `output_path`.
///
/// The scratch workspace comes from `workspaces` and is released before
/// returning. The output is written via a temp file + rename so a failed run
/// never leaves a partial file behind.
pub async fn process_file(
    input: &Path,
    output_path: &Path,
    spec: &PipelineSpec,
    workspaces: &WorkspaceManager,
    ctx: &ProcessContext,
) -> Result<ProcessingStats, ScanPrepError> {
    let upload = UploadedDocument::from_path(input).await?;
    let workspace = workspaces.acquire()?;
    let result = process_document(&upload, spec, &workspace, ctx).await;
    workspace.release().await;
    let processed = result?;

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ScanPrepError::io(format!("create {}", parent.display()), e))?;
    }
    let tmp_path = output_path.with_extension("part");
    tokio::fs::write(&tmp_path, processed.artifact.bytes())
        .await
        .map_err(|e| ScanPrepError::PersistenceFailed {
            path: output_path.to_path_buf(),
            detail: e.to_string(),
        })?;
    tokio::fs::rename(&tmp_path, output_path)
        .await
        .map_err(|e| ScanPrepError::PersistenceFailed {
            path: output_path.to_path_buf(),
            detail: e.to_string(),
        })?;

    Ok(processed.stats)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Run the pipeline over `sources` with at most `ctx.page_concurrency` pages
/// in flight. Output order follows input order; the first failure aborts.
async fn run_pages(
    sources: Vec<PathBuf>,
    out_dir: &Path,
    spec: &PipelineSpec,
    ctx: &ProcessContext,
) -> Result<Vec<PageArtifact>, ScanPrepError> {
    let total_pages = sources.len();

    stream::iter(sources.into_iter().enumerate())
        .map(|(idx, source)| {
            let page_num = idx + 1;
            let output = out_dir.join(format!("processed_page_{page_num}.png"));
            let spec = spec.clone();
            let transforms = Arc::clone(&ctx.transforms);
            let progress = Arc::clone(&ctx.progress);
            async move {
                progress.on_page_start(page_num, total_pages);
                let result = tokio::task::spawn_blocking(move || {
                    run_pipeline(&source, &output, &spec, transforms)
                })
                .await
                .map_err(|e| ScanPrepError::Internal(format!("Page task panicked: {}", e)))
                .and_then(|r| r);

                match result {
                    Ok(path) => {
                        let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                        debug!(page = page_num, bytes, "Page processed");
                        progress.on_page_complete(page_num, total_pages, bytes);
                        Ok(PageArtifact { page_num, path })
                    }
                    Err(e) => {
                        progress.on_page_error(page_num, total_pages, &e.to_string());
                        Err(e)
                    }
                }
            }
        })
        .buffered(ctx.page_concurrency.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::PipelineStep;
    use image::{DynamicImage, GrayImage, Luma};

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = GrayImage::from_fn(w, h, |x, _| Luma([(x * 255 / w.max(1)) as u8]));
        DynamicImage::ImageLuma8(img).save(path).unwrap();
    }

    #[test]
    fn run_pipeline_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.png");
        let out = dir.path().join("out.png");
        write_png(&src, 40, 20);

        let spec = PipelineSpec::single(PipelineStep::Resize(Some(0.5)));
        let written = run_pipeline(&src, &out, &spec, Arc::new(StandardTransforms::new())).unwrap();
        assert_eq!(written, out);
        let img = image::open(&out).unwrap();
        assert_eq!((img.width(), img.height()), (20, 10));
    }

    #[test]
    fn run_pipeline_fails_on_undecodable_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.png");
        std::fs::write(&src, b"nope").unwrap();
        let err = run_pipeline(
            &src,
            &dir.path().join("out.png"),
            &PipelineSpec::default(),
            Arc::new(StandardTransforms::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ScanPrepError::ImageLoadFailed { .. }));
    }

    #[tokio::test]
    async fn raster_upload_becomes_single_image() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("scan.png");
        write_png(&src, 32, 32);
        let upload = UploadedDocument::new("scan.png", std::fs::read(&src).unwrap());

        let manager = WorkspaceManager::new(dir.path().join("scratch"), false).unwrap();
        let ws = manager.acquire().unwrap();
        let ctx = ProcessContext::from_config(&ServiceConfig::default());
        let done = process_document(&upload, &PipelineSpec::default(), &ws, &ctx)
            .await
            .unwrap();

        assert!(!done.artifact.is_archive());
        assert_eq!(done.stats.pages, 1);
        assert_eq!(done.stats.rasterise_ms, 0);
        assert!(image::load_from_memory(done.artifact.bytes()).is_ok());
    }

    #[tokio::test]
    async fn upload_names_cannot_collide_with_workspace_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("scan.png");
        write_png(&src, 24, 24);
        let bytes = std::fs::read(&src).unwrap();

        let manager = WorkspaceManager::new(dir.path().join("scratch"), false).unwrap();
        let ctx = ProcessContext::from_config(&ServiceConfig::default());
        for name in ["processed", "pages", "input", "processed_images.zip"] {
            let ws = manager.acquire().unwrap();
            let upload = UploadedDocument::new(name, bytes.clone());
            let done = process_document(&upload, &PipelineSpec::default(), &ws, &ctx)
                .await
                .unwrap_or_else(|e| panic!("upload named {name:?} failed: {e}"));
            assert_eq!(done.stats.pages, 1);
            assert!(!done.artifact.is_archive());
        }
    }

    #[tokio::test]
    async fn process_file_writes_result() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("scan.png");
        let out = dir.path().join("out").join("clean.png");
        write_png(&src, 16, 16);

        let manager = WorkspaceManager::new(dir.path().join("scratch"), false).unwrap();
        let ctx = ProcessContext::from_config(&ServiceConfig::default());
        let stats = process_file(&src, &out, &PipelineSpec::default(), &manager, &ctx)
            .await
            .unwrap();
        assert_eq!(stats.pages, 1);
        assert!(out.is_file());
        assert!(!out.with_extension("part").exists());
        assert_eq!(std::fs::read_dir(manager.root()).unwrap().count(), 0);
    }
}
