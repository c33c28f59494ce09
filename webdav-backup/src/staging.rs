//! Temporary directory that holds the encrypted artifact for one job.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Owns a uniquely-named temp directory. The directory is removed by
/// [`release`](Self::release) or, failing that, on drop.
#[derive(Debug)]
pub struct StagingArea {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl StagingArea {
    /// Create a fresh directory under the system temp dir.
    pub fn acquire() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("webdav-backup-").tempdir()?;
        Self::wrap(dir)
    }

    /// Create a fresh directory under `parent`.
    pub fn acquire_in(parent: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("webdav-backup-")
            .tempdir_in(parent)?;
        Self::wrap(dir)
    }

    fn wrap(dir: TempDir) -> io::Result<Self> {
        let path = dir.path().to_path_buf();
        debug!("Acquired staging directory {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the artifact inside the staging directory.
    pub fn artifact_path(&self, artifact_name: &str) -> PathBuf {
        self.path.join(artifact_name)
    }

    /// Remove the directory recursively. Safe to call more than once and
    /// safe if someone else already deleted the directory.
    pub fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!("Removed staging directory {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to remove staging directory {}: {}", self.path.display(), e);
                // second chance, then give up
                let _ = std::fs::remove_dir_all(&self.path);
            }
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        self.release();
    }
}
