//! PDF rasterisation: render every page of a document to PNG files.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! [`rasterize_document`] moves the work onto the blocking pool so Tokio
//! worker threads keep serving other requests while a large document renders.
//!
//! ## Why a trait?
//!
//! Rendering needs a native library the HTTP tests should not depend on.
//! [`Rasterizer`] is the seam: production uses [`PdfiumRasterizer`], tests
//! plug in a fake that writes synthetic pages.

use crate::error::ScanPrepError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the rendered image for 1-based page `page_num`.
pub fn page_file_name(page_num: usize) -> String {
    format!("page_{page_num}.png")
}

/// Turns a PDF into one image file per page.
pub trait Rasterizer: Send + Sync {
    /// Render every page of `pdf_path` at `dpi` into `out_dir`.
    ///
    /// Returns the written paths in page order. Blocking.
    fn rasterize(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        dpi: u32,
    ) -> Result<Vec<PathBuf>, ScanPrepError>;
}

/// [`Rasterizer`] backed by pdfium.
///
/// The library is bound per call: binding is cheap next to rendering, and it
/// keeps the rasteriser `Send + Sync` without holding pdfium across threads.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// Bind to the system pdfium, or to the library at `library_path`.
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    fn bind(&self) -> Result<Pdfium, ScanPrepError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ScanPrepError::PdfiumBindingFailed(e.to_string()))?;
        Ok(Pdfium::new(bindings))
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        dpi: u32,
    ) -> Result<Vec<PathBuf>, ScanPrepError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| ScanPrepError::RasterisationFailed {
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        info!(pages = pages.len(), dpi, "PDF loaded");

        // PDF user space is 72 units per inch.
        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

        let mut written = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                ScanPrepError::RasterisationFailed {
                    detail: format!("page {page_num}: {:?}", e),
                }
            })?;
            let image = bitmap.as_image();
            let path = out_dir.join(page_file_name(page_num));
            image
                .save_with_format(&path, image::ImageFormat::Png)
                .map_err(|e| ScanPrepError::RasterisationFailed {
                    detail: format!("page {page_num}: {e}"),
                })?;
            debug!(
                page = page_num,
                width = image.width(),
                height = image.height(),
                "Rendered page"
            );
            written.push(path);
        }

        Ok(written)
    }
}

/// Run `rasterizer` on the blocking pool.
pub async fn rasterize_document(
    rasterizer: Arc<dyn Rasterizer>,
    pdf_path: &Path,
    out_dir: &Path,
    dpi: u32,
) -> Result<Vec<PathBuf>, ScanPrepError> {
    let pdf_path = pdf_path.to_path_buf();
    let out_dir = out_dir.to_path_buf();

    tokio::task::spawn_blocking(move || rasterizer.rasterize(&pdf_path, &out_dir, dpi))
        .await
        .map_err(|e| ScanPrepError::Internal(format!("Render task panicked: {}", e)))?
}
