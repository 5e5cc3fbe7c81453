//! Multipart form parsing.
//!
//! The whole form is read up front: file parts (`image`, `file`) are kept as
//! [`UploadedDocument`]s and everything else as text. Numeric fields are
//! lenient; a value that does not parse falls back to the route's default.

use crate::error::ScanPrepError;
use crate::pipeline::input::UploadedDocument;
use axum::extract::multipart::{Multipart, MultipartError};
use std::collections::HashMap;
use tracing::debug;

/// Field names that may carry the upload, in order of preference.
pub const FILE_FIELDS: [&str; 2] = ["image", "file"];

/// A fully read multipart form.
#[derive(Debug, Default)]
pub struct UploadForm {
    files: Vec<(String, UploadedDocument)>,
    fields: HashMap<String, Vec<String>>,
}

impl UploadForm {
    /// Drain `multipart`. A part counts as a file only if it is named like
    /// one of [`FILE_FIELDS`] and carries a filename (possibly empty).
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, MultipartError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();
            match field.file_name().map(str::to_string) {
                Some(filename) if FILE_FIELDS.contains(&name.as_str()) => {
                    let bytes = field.bytes().await?;
                    debug!(field = %name, filename = %filename, bytes = bytes.len(), "File part received");
                    form.push_file(name, UploadedDocument::new(filename, bytes.to_vec()));
                }
                _ => {
                    let value = field.text().await?;
                    form.push_field(name, value);
                }
            }
        }
        Ok(form)
    }

    pub fn push_file(&mut self, field: impl Into<String>, upload: UploadedDocument) {
        self.files.push((field.into(), upload));
    }

    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(name.into()).or_default().push(value.into());
    }

    /// Pick the upload: the first `image` part with a filename, else the first
    /// `file` part with a filename.
    ///
    /// # Errors
    /// * [`ScanPrepError::NoFileSelected`] when file parts exist but all have
    ///   empty filenames.
    /// * [`ScanPrepError::MissingInput`] when there are no file parts.
    pub fn take_upload(&mut self) -> Result<UploadedDocument, ScanPrepError> {
        if self.files.is_empty() {
            return Err(ScanPrepError::MissingInput);
        }
        for wanted in FILE_FIELDS {
            if let Some(pos) = self
                .files
                .iter()
                .position(|(name, upload)| name == wanted && !upload.filename.is_empty())
            {
                return Ok(self.files.swap_remove(pos).1);
            }
        }
        Err(ScanPrepError::NoFileSelected)
    }

    /// First value of a text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Every value of a repeated text field, in submission order.
    pub fn values(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Integer field, or `default` when absent or not an integer.
    pub fn int_or(&self, name: &str, default: i32) -> i32 {
        self.text(name)
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(default)
    }

    /// Float field, or `default` when absent, unparsable or not finite.
    pub fn float_or(&self, name: &str, default: f32) -> f32 {
        self.text(name)
            .and_then(|v| v.trim().parse::<f32>().ok())
            .filter(|f| f.is_finite())
            .unwrap_or(default)
    }
}
