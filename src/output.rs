//! Result types produced by [`crate::process::process_document`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Content type of a single processed page.
pub const PNG_CONTENT_TYPE: &str = "image/png";
/// Content type of a multi-page archive.
pub const ZIP_CONTENT_TYPE: &str = "application/zip";
/// Download name of a single processed page.
pub const IMAGE_FILENAME: &str = "processed.png";
/// Download name of a multi-page archive.
pub const ARCHIVE_FILENAME: &str = "processed_images.zip";

/// One processed page on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageArtifact {
    /// 1-indexed page number.
    pub page_num: usize,
    pub path: PathBuf,
}

/// What goes back to the client.
#[derive(Debug, Clone)]
pub enum ResultArtifact {
    /// Exactly one page: the processed PNG.
    Image { bytes: Vec<u8> },
    /// Several pages: a zip with one `page_<n>.png` entry per page.
    Archive { bytes: Vec<u8>, entries: Vec<String> },
}

impl ResultArtifact {
    pub fn content_type(&self) -> &'static str {
        match self {
            ResultArtifact::Image { .. } => PNG_CONTENT_TYPE,
            ResultArtifact::Archive { .. } => ZIP_CONTENT_TYPE,
        }
    }

    pub fn filename(&self) -> &'static str {
        match self {
            ResultArtifact::Image { .. } => IMAGE_FILENAME,
            ResultArtifact::Archive { .. } => ARCHIVE_FILENAME,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            ResultArtifact::Image { bytes } | ResultArtifact::Archive { bytes, .. } => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ResultArtifact::Image { bytes } | ResultArtifact::Archive { bytes, .. } => bytes,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, ResultArtifact::Archive { .. })
    }
}

/// Timing and size figures for one processed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub pages: usize,
    /// Time spent in PDF rasterisation (0 for raster uploads).
    pub rasterise_ms: u64,
    /// Time spent running the step pipeline over all pages.
    pub pipeline_ms: u64,
    pub total_ms: u64,
    /// Size of the returned body.
    pub output_bytes: usize,
}

/// A finished document: the artifact to return plus how it was made.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub artifact: ResultArtifact,
    pub stats: ProcessingStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_and_archive_metadata() {
        let img = ResultArtifact::Image { bytes: vec![1, 2] };
        assert_eq!(img.content_type(), "image/png");
        assert!(!img.is_archive());

        let zip = ResultArtifact::Archive {
            bytes: vec![3],
            entries: vec!["page_1.png".into(), "page_2.png".into()],
        };
        assert_eq!(zip.content_type(), "application/zip");
        assert_eq!(zip.filename(), "processed_images.zip");
        assert_eq!(zip.bytes(), &[3]);
        assert_eq!(zip.into_bytes(), vec![3]);
    }

    #[test]
    fn stats_serialise_to_json() {
        let stats = ProcessingStats {
            pages: 2,
            total_ms: 15,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["pages"], 2);
        assert_eq!(json["total_ms"], 15);
    }
}
