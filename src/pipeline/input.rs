//! Input staging: classify an upload and write it into the request workspace.
//!
//! pdfium and the image decoders both want a file-system path, so the upload
//! is written into the request's [`Workspace`] before anything else happens.
//! The staged name is a sanitised form of the client's filename; the client
//! name itself is never used as a path.

use crate::error::ScanPrepError;
use crate::workspace::Workspace;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Staged name used when sanitising leaves nothing.
pub const FALLBACK_FILENAME: &str = "upload";

/// Workspace sub-directory holding the staged upload.
pub const STAGING_DIR: &str = "input";

/// How an upload will be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Rasterised page by page.
    Pdf,
    /// Processed directly as a single page.
    RasterImage,
}

impl DocumentKind {
    /// Decide by extension: a case-insensitive `.pdf` suffix means PDF,
    /// anything else is treated as a raster image.
    pub fn from_filename(filename: &str) -> Self {
        if filename.to_ascii_lowercase().ends_with(".pdf") {
            DocumentKind::Pdf
        } else {
            DocumentKind::RasterImage
        }
    }
}

/// A file received from the client.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    /// Filename as the client sent it.
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Read a local file as an upload (used by the CLI).
    pub async fn from_path(path: &Path) -> Result<Self, ScanPrepError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ScanPrepError::io(format!("read {}", path.display()), e))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(filename, bytes))
    }

    pub fn kind(&self) -> DocumentKind {
        DocumentKind::from_filename(&self.filename)
    }

    /// Write the upload into the workspace's `input/` directory under its
    /// sanitised name. Keeping it in its own directory means no client name
    /// can collide with the pipeline's `pages/` or `processed/` directories.
    pub async fn stage(&self, workspace: &Workspace) -> Result<StagedInput, ScanPrepError> {
        let path = workspace
            .subdir(STAGING_DIR)?
            .join(sanitize_filename(&self.filename));
        tokio::fs::write(&path, &self.bytes)
            .await
            .map_err(|e| ScanPrepError::io(format!("stage upload to {}", path.display()), e))?;
        debug!(
            path = %path.display(),
            bytes = self.bytes.len(),
            kind = ?self.kind(),
            "Upload staged"
        );
        Ok(StagedInput {
            path,
            kind: self.kind(),
        })
    }
}

/// An upload written to disk.
#[derive(Debug, Clone)]
pub struct StagedInput {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

/// Reduce a client filename to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9._-]` is removed and leading/trailing dots and underscores are
/// stripped. An empty result becomes [`FALLBACK_FILENAME`].
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let spaced = RE_WHITESPACE.replace_all(base.trim(), "_");
    let cleaned = RE_UNSAFE.replace_all(&spaced, "");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceManager;

    #[test]
    fn pdf_detection_is_case_insensitive_suffix() {
        assert_eq!(DocumentKind::from_filename("scan.PDF"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_filename("a.b.pdf"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_filename("pdf.png"), DocumentKind::RasterImage);
        assert_eq!(DocumentKind::from_filename("notes.pdfx"), DocumentKind::RasterImage);
        assert_eq!(DocumentKind::from_filename("noext"), DocumentKind::RasterImage);
    }

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(r"C:\scans\page one.png"), "page_one.png");
        assert_eq!(sanitize_filename("résumé.pdf"), "rsum.pdf");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }

    #[test]
    fn sanitize_falls_back_when_nothing_is_left() {
        assert_eq!(sanitize_filename(""), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("///"), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("文書"), FALLBACK_FILENAME);
    }

    #[tokio::test]
    async fn stage_writes_into_workspace() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path(), false).unwrap();
        let ws = manager.acquire().unwrap();
        let upload = UploadedDocument::new("../Report 2024.PDF", b"%PDF-1.4".to_vec());
        let staged = upload.stage(&ws).await.unwrap();
        assert_eq!(staged.kind, DocumentKind::Pdf);
        assert_eq!(staged.path, ws.path().join(STAGING_DIR).join("Report_2024.PDF"));
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"%PDF-1.4");
    }
}
