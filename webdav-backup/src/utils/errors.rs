//! Error types for the backup pipeline.
//!
//! Pre-flight and artifact errors abort the whole job. Everything a single
//! destination can produce is caught at the destination boundary and turned
//! into a [`DestinationOutcome`](crate::job::DestinationOutcome).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Passphrase file unusable: {}: {reason}", path.display())]
    CredentialMissing { path: PathBuf, reason: String },

    #[error("Credentials file missing: {}", .0.display())]
    AuthConfigMissing(PathBuf),

    #[error("Archive stage failed: {0}")]
    ArchiveFailed(String),

    #[error("Encryption stage failed: {0}")]
    EncryptionFailed(String),

    #[error("Provisioning {url} failed with HTTP {status}: {body}")]
    Provision { url: String, status: u16, body: String },

    #[error("Transport error at {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upload to {url} failed after {attempts} attempt(s): {last_error}")]
    UploadFailed {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Verification of {url} failed: {reason}")]
    Verify { url: String, reason: String },

    #[error("Interrupted by signal")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Errors that end the whole job rather than a single destination.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BackupError::Provision { .. }
                | BackupError::Transport { .. }
                | BackupError::UploadFailed { .. }
                | BackupError::Verify { .. }
        )
    }

    /// Short label for summaries and structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Config(_) => "config",
            BackupError::SourceNotFound(_) => "source-not-found",
            BackupError::CredentialMissing { .. } => "credential-missing",
            BackupError::AuthConfigMissing(_) => "auth-config-missing",
            BackupError::ArchiveFailed(_) => "archive-failed",
            BackupError::EncryptionFailed(_) => "encryption-failed",
            BackupError::Provision { .. } => "provision",
            BackupError::Transport { .. } => "transport",
            BackupError::UploadFailed { .. } => "upload-failed",
            BackupError::Verify { .. } => "verify",
            BackupError::Interrupted => "interrupted",
            BackupError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
