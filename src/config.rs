//! Service configuration.
//!
//! Every knob the service reads lives in [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`] or loaded from the environment with
//! [`ServiceConfig::from_env`]. The scratch root in particular is a plain
//! value here: it is handed to [`crate::workspace::WorkspaceManager`] at
//! startup instead of being looked up from a global.

use crate::error::ScanPrepError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default listening port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 5000;

/// Largest accepted request body (16 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Resolution PDFs are rasterised at.
pub const DEFAULT_PDF_DPI: u32 = 300;

/// Configuration for the preprocessing service.
///
/// # Example
/// ```rust
/// use scanprep::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .port(8080)
///     .keep_workspaces(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.bind_addr(), "0.0.0.0:8080");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Interface to bind. Default: `0.0.0.0`.
    pub bind_host: String,

    /// TCP port. Default: 5000 (env `PORT`).
    pub port: u16,

    /// Directory under which every request gets its own scratch directory.
    /// Created at startup if absent. Default: `temp/` next to the executable.
    pub scratch_root: PathBuf,

    /// Leave request scratch directories on disk after the response is sent.
    /// Default: false.
    ///
    /// Only meant for inspecting intermediate page images while debugging a
    /// pipeline; with it on, the scratch root grows without bound.
    pub keep_workspaces: bool,

    /// Maximum request body in bytes. Default: 16 MiB.
    pub max_upload_bytes: usize,

    /// Rasterisation DPI for PDF pages. Range: 72–600. Default: 300.
    pub pdf_dpi: u32,

    /// How many pages of one document are run through the pipeline at once.
    /// Default: 1 (sequential).
    ///
    /// Pages share no state, so raising this is safe; output order is kept
    /// regardless.
    pub page_concurrency: usize,

    /// Explicit path to libpdfium. `None` binds the system library.
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            scratch_root: default_scratch_root(),
            keep_workspaces: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            pdf_dpi: DEFAULT_PDF_DPI,
            page_concurrency: 1,
            pdfium_library_path: None,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load configuration from process environment variables.
    ///
    /// | Variable                   | Field                 |
    /// |----------------------------|-----------------------|
    /// | `PORT`                     | `port`                |
    /// | `SCANPREP_HOST`            | `bind_host`           |
    /// | `SCANPREP_SCRATCH_DIR`     | `scratch_root`        |
    /// | `SCANPREP_KEEP_WORKSPACES` | `keep_workspaces`     |
    /// | `SCANPREP_PAGE_CONCURRENCY`| `page_concurrency`    |
    /// | `PDFIUM_LIB_PATH`          | `pdfium_library_path` |
    pub fn from_env() -> Result<Self, ScanPrepError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] but reads through `lookup`, so
    /// tests can supply variables without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScanPrepError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(port) = lookup("PORT") {
            let port = port.trim().parse::<u16>().map_err(|_| {
                ScanPrepError::InvalidConfig(format!("PORT must be a port number, got '{port}'"))
            })?;
            builder = builder.port(port);
        }
        if let Some(host) = lookup("SCANPREP_HOST").filter(|h| !h.is_empty()) {
            builder = builder.bind_host(host);
        }
        if let Some(dir) = lookup("SCANPREP_SCRATCH_DIR").filter(|d| !d.is_empty()) {
            builder = builder.scratch_root(dir);
        }
        if let Some(flag) = lookup("SCANPREP_KEEP_WORKSPACES") {
            builder = builder.keep_workspaces(is_truthy(&flag));
        }
        if let Some(n) = lookup("SCANPREP_PAGE_CONCURRENCY") {
            let n = n.trim().parse::<usize>().map_err(|_| {
                ScanPrepError::InvalidConfig(format!(
                    "SCANPREP_PAGE_CONCURRENCY must be a positive integer, got '{n}'"
                ))
            })?;
            builder = builder.page_concurrency(n);
        }
        if let Some(path) = lookup("PDFIUM_LIB_PATH").filter(|p| !p.is_empty()) {
            builder = builder.pdfium_library_path(path);
        }

        builder.build()
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.config.bind_host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = dir.into();
        self
    }

    pub fn keep_workspaces(mut self, v: bool) -> Self {
        self.config.keep_workspaces = v;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn pdf_dpi(mut self, dpi: u32) -> Self {
        self.config.pdf_dpi = dpi;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ScanPrepError> {
        let c = &self.config;
        if !(72..=600).contains(&c.pdf_dpi) {
            return Err(ScanPrepError::InvalidConfig(format!(
                "PDF DPI must be 72–600, got {}",
                c.pdf_dpi
            )));
        }
        if c.page_concurrency == 0 {
            return Err(ScanPrepError::InvalidConfig(
                "Page concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(ScanPrepError::InvalidConfig(
                "Maximum upload size must be > 0".into(),
            ));
        }
        if c.scratch_root.as_os_str().is_empty() {
            return Err(ScanPrepError::InvalidConfig(
                "Scratch root must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

/// `temp/` beside the running executable, or under the system temp dir when
/// the executable path is unavailable.
fn default_scratch_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("temp")))
        .unwrap_or_else(|| std::env::temp_dir().join("scanprep"))
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
