//! Result packaging: processed pages → response body.
//!
//! One page goes back as its PNG bytes. Several pages are bundled into
//! `processed_images.zip` with one `page_<n>.png` entry per page, in page
//! order. The archive is written into the request workspace first and read
//! back, so even large documents never hold both the pages and the zip in
//! memory at once while writing.

use crate::error::ScanPrepError;
use crate::output::{PageArtifact, ResultArtifact, ARCHIVE_FILENAME};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Archive entry name for 1-based page `page_num`.
pub fn archive_entry_name(page_num: usize) -> String {
    format!("page_{page_num}.png")
}

/// Turn processed pages into the response artifact. Blocking.
///
/// `pages` must already be in page order.
pub fn package(pages: &[PageArtifact], workspace: &Path) -> Result<ResultArtifact, ScanPrepError> {
    match pages {
        [] => Err(ScanPrepError::Internal(
            "no processed pages to return".into(),
        )),
        [single] => {
            let bytes = std::fs::read(&single.path).map_err(|e| {
                ScanPrepError::io(format!("read {}", single.path.display()), e)
            })?;
            debug!(bytes = bytes.len(), "Returning single image");
            Ok(ResultArtifact::Image { bytes })
        }
        many => {
            let zip_path = workspace.join(ARCHIVE_FILENAME);
            let entries = write_archive(many, &zip_path)?;
            let bytes = std::fs::read(&zip_path)
                .map_err(|e| ScanPrepError::io(format!("read {}", zip_path.display()), e))?;
            info!(pages = entries.len(), bytes = bytes.len(), "Archive built");
            Ok(ResultArtifact::Archive { bytes, entries })
        }
    }
}

fn write_archive(pages: &[PageArtifact], zip_path: &Path) -> Result<Vec<String>, ScanPrepError> {
    let archive_err = |detail: String| ScanPrepError::ArchiveFailed {
        path: zip_path.to_path_buf(),
        detail,
    };

    let file = File::create(zip_path).map_err(|e| archive_err(e.to_string()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::with_capacity(pages.len());
    for page in pages {
        let name = archive_entry_name(page.page_num);
        zip.start_file(name.as_str(), options)
            .map_err(|e| archive_err(e.to_string()))?;
        let mut src = File::open(&page.path)
            .map_err(|e| archive_err(format!("{}: {e}", page.path.display())))?;
        std::io::copy(&mut src, &mut zip).map_err(|e| archive_err(e.to_string()))?;
        entries.push(name);
    }

    zip.finish().map_err(|e| archive_err(e.to_string()))?;
    Ok(entries)
}
