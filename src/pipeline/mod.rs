//! Pipeline stages for document preprocessing.
//!
//! Each submodule implements one stage; [`crate::process`] wires them up.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ preprocess ──▶ encode
//! (stage)   (pdfium)   (steps)        (png / zip)
//! ```
//!
//! 1. [`input`]  — classify the upload and write it into the request workspace
//! 2. [`render`] — rasterise PDF pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`preprocess`] — run the step pipeline on each page image, built from
//!    the primitives in [`transform`]
//! 4. [`encode`] — return one page as PNG, several as a zip archive

pub mod encode;
pub mod input;
pub mod preprocess;
pub mod render;
pub mod transform;
