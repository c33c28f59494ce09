//! Archive + encrypt stage.
//!
//! Sources are streamed through tar, gzip and the encryption writer into a
//! single file. No plaintext archive is ever written to disk.

pub mod crypto;
pub mod walker;

use crate::utils::errors::{BackupError, Result};
use crypto::{EncryptWriter, KdfParams, StageFault};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walker::{walk_source, NamingOptions};

/// Check that every source exists. Runs before anything touches the disk.
pub fn check_sources(sources: &[PathBuf]) -> Result<()> {
    if sources.is_empty() {
        return Err(BackupError::Config("no source paths configured".to_string()));
    }
    for source in sources {
        // symlink_metadata so a dangling top-level link still counts as present
        if std::fs::symlink_metadata(source).is_err() {
            return Err(BackupError::SourceNotFound(source.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct ArchiveStats {
    files: usize,
    dirs: usize,
    links: usize,
}

/// Produces the encrypted artifact. Blocking; run it off the async runtime.
#[derive(Debug, Clone)]
pub struct ArchiveEncryptor {
    kdf: KdfParams,
    naming: NamingOptions,
    cancel: CancellationToken,
}

impl ArchiveEncryptor {
    pub fn new(kdf: KdfParams, naming: NamingOptions, cancel: CancellationToken) -> Self {
        Self { kdf, naming, cancel }
    }

    /// Archive `sources`, encrypt with the passphrase in `passphrase_file`,
    /// write the result to `output` and return its size.
    ///
    /// On any failure `output` is removed before returning.
    pub fn produce(&self, sources: &[PathBuf], passphrase_file: &Path, output: &Path) -> Result<u64> {
        check_sources(sources)?;
        let passphrase = crypto::load_passphrase(passphrase_file)?;

        let result = self.write_artifact(sources, &passphrase, output);
        if result.is_err() {
            let _ = std::fs::remove_file(output);
        }
        result
    }

    fn write_artifact(&self, sources: &[PathBuf], passphrase: &str, output: &Path) -> Result<u64> {
        let fault = StageFault::default();
        let encryption_failed = |e: io::Error| {
            BackupError::EncryptionFailed(format!("{}: {}", output.display(), e))
        };

        let file = File::create(output).map_err(encryption_failed)?;
        let sealer = EncryptWriter::new(BufWriter::new(file), passphrase, self.kdf, fault.clone())
            .map_err(encryption_failed)?;
        let gz = GzEncoder::new(sealer, Compression::default());
        let mut builder = tar::Builder::new(Cancellable {
            inner: gz,
            cancel: self.cancel.clone(),
        });
        builder.follow_symlinks(false);
        let failure = |e: io::Error| {
            if self.cancel.is_cancelled() {
                BackupError::Interrupted
            } else {
                attribute(&fault, e)
            }
        };

        let mut stats = ArchiveStats::default();
        for source in sources {
            for entry in walk_source(source, self.naming) {
                if self.cancel.is_cancelled() {
                    return Err(BackupError::Interrupted);
                }
                let entry = entry.map_err(failure)?;
                builder
                    .append_path_with_name(&entry.path, &entry.name)
                    .map_err(|e| failure(io::Error::new(e.kind(), format!("{}: {}", entry.path.display(), e))))?;
                if entry.is_symlink {
                    stats.links += 1;
                } else if entry.is_dir {
                    stats.dirs += 1;
                } else {
                    stats.files += 1;
                }
            }
            debug!("Archived source {}", source.display());
        }

        let gz = builder.into_inner().map_err(failure)?.inner;
        let sealer = gz.finish().map_err(failure)?;
        let mut out = sealer.finish().map_err(encryption_failed)?;
        out.flush().map_err(encryption_failed)?;
        let file = out.into_inner().map_err(|e| encryption_failed(e.into_error()))?;
        file.sync_all().map_err(encryption_failed)?;
        let size = file.metadata().map_err(encryption_failed)?.len();

        info!(
            "Archived {} files, {} directories, {} links into {} ({} bytes)",
            stats.files,
            stats.dirs,
            stats.links,
            output.display(),
            size
        );
        Ok(size)
    }
}

/// Fails writes once the job is cancelled, so a single large file cannot
/// keep the archive stage busy after an interruption.
struct Cancellable<W> {
    inner: W,
    cancel: CancellationToken,
}

impl<W: Write> Write for Cancellable<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("archive cancelled"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Errors bubble up through tar and gzip alike; the fault cell tells us
/// whether the encryption stage underneath was the one that broke.
fn attribute(fault: &StageFault, err: io::Error) -> BackupError {
    match fault.get() {
        Some(cause) => BackupError::EncryptionFailed(cause.to_string()),
        None => BackupError::ArchiveFailed(err.to_string()),
    }
}
