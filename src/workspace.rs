//! Per-request scratch directories.
//!
//! Every request gets a fresh directory under the configured scratch root to
//! hold the staged upload, rendered pages, processed pages and the archive.
//! A [`Workspace`] wraps a `tempfile::TempDir`, so the directory disappears
//! when the workspace is dropped, including on early `?` returns and panics.
//! With `keep_workspaces` on, the directory is instead left on disk and its
//! path logged.

use crate::error::ScanPrepError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Hands out [`Workspace`]s under one scratch root. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: Arc<PathBuf>,
    keep: bool,
}

impl WorkspaceManager {
    /// Create the manager, creating `root` if it does not exist.
    pub fn new(root: impl Into<PathBuf>, keep: bool) -> Result<Self, ScanPrepError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            ScanPrepError::io(format!("create scratch root {}", root.display()), e)
        })?;
        debug!(root = %root.display(), keep, "Scratch root ready");
        Ok(Self {
            root: Arc::new(root),
            keep,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, uniquely named directory for one request.
    pub fn acquire(&self) -> Result<Workspace, ScanPrepError> {
        let dir = tempfile::Builder::new()
            .prefix("req-")
            .tempdir_in(self.root.as_path())
            .map_err(|e| {
                ScanPrepError::io(
                    format!("create workspace under {}", self.root.display()),
                    e,
                )
            })?;
        debug!(workspace = %dir.path().display(), "Workspace acquired");
        Ok(Workspace {
            dir: Some(dir),
            keep: self.keep,
        })
    }
}

/// A scratch directory owned by one request.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    keep: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            // Only reachable after release(), which consumes self.
            None => Path::new(""),
        }
    }

    /// Sub-directory of the workspace, created on demand.
    pub fn subdir(&self, name: &str) -> Result<PathBuf, ScanPrepError> {
        let path = self.path().join(name);
        std::fs::create_dir_all(&path)
            .map_err(|e| ScanPrepError::io(format!("create {}", path.display()), e))?;
        Ok(path)
    }

    /// Remove the directory now (or keep it, in debug mode) and log the
    /// outcome. The recursive delete runs on the blocking pool; dropping a
    /// workspace instead deletes on the current thread.
    pub async fn release(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let keep = self.keep;
        let path = dir.path().to_path_buf();
        if let Err(e) = tokio::task::spawn_blocking(move || finish(dir, keep)).await {
            warn!(workspace = %path.display(), error = %e, "Workspace cleanup task failed");
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            finish(dir, self.keep);
        }
    }
}

fn finish(dir: TempDir, keep: bool) {
    if keep {
        let path = dir.keep();
        info!(workspace = %path.display(), "Keeping workspace for inspection");
        return;
    }
    let path = dir.path().to_path_buf();
    match dir.close() {
        Ok(()) => debug!(workspace = %path.display(), "Workspace removed"),
        Err(e) => warn!(workspace = %path.display(), error = %e, "Failed to remove workspace"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workspace_is_removed_on_release() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().join("scratch"), false).unwrap();
        let ws = manager.acquire().unwrap();
        let path = ws.path().to_path_buf();
        std::fs::write(path.join("upload.png"), b"x").unwrap();
        assert!(path.is_dir());
        ws.release().await;
        assert!(!path.exists());
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path(), false).unwrap();
        let path = {
            let ws = manager.acquire().unwrap();
            ws.subdir("pages").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn debug_mode_keeps_workspace() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path(), true).unwrap();
        let ws = manager.acquire().unwrap();
        let path = ws.path().to_path_buf();
        ws.release().await;
        assert!(path.is_dir());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn release_removes_populated_tree_from_single_threaded_runtime() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path(), false).unwrap();
        let ws = manager.acquire().unwrap();
        let pages = ws.subdir("pages").unwrap();
        for i in 0..50 {
            std::fs::write(pages.join(format!("page_{i}.png")), [0u8; 64]).unwrap();
        }
        let path = ws.path().to_path_buf();

        let removal = tokio::spawn(ws.release());
        let other = tokio::spawn(async { 7 });
        assert_eq!(other.await.unwrap(), 7);
        removal.await.unwrap();
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(manager.root()).unwrap().count(), 0);
    }

    #[test]
    fn concurrent_workspaces_are_distinct() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path(), false).unwrap();
        let a = manager.acquire().unwrap();
        let b = manager.acquire().unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(manager.root()));
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("req-"));
    }
}
