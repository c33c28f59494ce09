//! Job data model: what is backed up, where it goes, and how it went.

use crate::config::Config;
use crate::utils::errors::BackupError;
use chrono::{DateTime, Local};
use std::path::PathBuf;

/// Suffix of every artifact name. Archive, gzip, encrypted.
pub const ARTIFACT_SUFFIX: &str = "tar.gz.enc";

/// Remote collection all backups live under.
pub const REMOTE_ROOT: &str = "backups";

/// A single backup run. Timestamp and month are captured once, from the
/// same instant, when the job is created.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub sources: Vec<PathBuf>,
    pub prefix: String,
    /// `YYYYMMDD-HHMMSS`
    pub timestamp: String,
    /// `YYYY-MM`
    pub month: String,
}

impl BackupJob {
    pub fn new(sources: Vec<PathBuf>, prefix: impl Into<String>, started_at: DateTime<Local>) -> Self {
        Self {
            sources,
            prefix: prefix.into(),
            timestamp: started_at.format("%Y%m%d-%H%M%S").to_string(),
            month: started_at.format("%Y-%m").to_string(),
        }
    }

    pub fn from_config(config: &Config, started_at: DateTime<Local>) -> Self {
        Self::new(config.job.sources.clone(), config.job.prefix.clone(), started_at)
    }

    /// `<prefix>-<timestamp>.tar.gz.enc`
    pub fn artifact_name(&self) -> String {
        format!("{}-{}.{}", self.prefix, self.timestamp, ARTIFACT_SUFFIX)
    }

    /// Relative remote directory shared by every destination of this job.
    pub fn remote_dir(&self) -> String {
        format!("{}/{}", REMOTE_ROOT, self.month)
    }
}

/// One WebDAV target with its remote directory resolved once.
///
/// Provisioning, upload and verification all read `remote_dir` from here,
/// so they can never disagree about which month directory is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub name: String,
    /// Base URL without trailing slash
    pub base_url: String,
    pub remote_dir: String,
}

impl Destination {
    pub fn new(name: Option<&str>, base_url: &str, remote_dir: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            name: name.map(str::to_string).unwrap_or_else(|| base_url.clone()),
            base_url,
            remote_dir: remote_dir.trim_matches('/').to_string(),
        }
    }

    /// Destinations in configured order, all pointing at the job's remote dir.
    pub fn from_config(config: &Config, job: &BackupJob) -> Vec<Self> {
        let remote_dir = job.remote_dir();
        config
            .destinations
            .iter()
            .map(|d| Self::new(d.name.as_deref(), &d.url, &remote_dir))
            .collect()
    }

    pub fn object_url(&self, artifact_name: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.remote_dir, artifact_name)
    }
}

/// Result of running provision + upload + verify against one destination.
#[derive(Debug)]
pub struct DestinationOutcome {
    pub destination: String,
    pub error: Option<BackupError>,
}

impl DestinationOutcome {
    pub fn succeeded(destination: &Destination) -> Self {
        Self {
            destination: destination.name.clone(),
            error: None,
        }
    }

    pub fn failed(destination: &Destination, error: BackupError) -> Self {
        Self {
            destination: destination.name.clone(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a finished job reports back.
#[derive(Debug)]
pub struct JobReport {
    pub artifact_name: String,
    pub artifact_size: u64,
    pub outcomes: Vec<DestinationOutcome>,
}

impl JobReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DestinationOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// All-or-nothing: one failed destination fails the run.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(DestinationOutcome::is_success)
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}
