//! Progress-callback trait for per-page processing events.
//!
//! Pass an [`Arc<dyn PageProgressCallback>`] in
//! [`crate::process::ProcessContext`] to be told as each page of a document
//! moves through the pipeline. The CLI drives a progress bar from it; the
//! HTTP service uses [`NoopProgressCallback`].
//!
//! # Example
//!
//! ```rust
//! use scanprep::PageProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PageProgressCallback for Counter {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, output_bytes: u64) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num}/{total_pages}: {output_bytes} bytes");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by [`crate::process::process_document`] as it works through pages.
///
/// All methods default to no-ops. With `page_concurrency > 1` the page
/// events may arrive concurrently and out of order, so implementations must
/// synchronise any shared state.
pub trait PageProgressCallback: Send + Sync {
    /// Called once the page count is known, before any page is processed.
    fn on_document_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before the pipeline runs on a page (1-indexed).
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a processed page has been written; `output_bytes` is its
    /// size on disk.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, output_bytes: u64) {
        let _ = (page_num, total_pages, output_bytes);
    }

    /// Called when a page could not be loaded or saved. The document fails.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages were attempted.
    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// Ignores every event.
pub struct NoopProgressCallback;

impl PageProgressCallback for NoopProgressCallback {}

/// The shared callback type carried by [`crate::process::ProcessContext`].
pub type ProgressCallback = Arc<dyn PageProgressCallback>;
