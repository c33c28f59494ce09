//! Backup orchestrator - runs one job end to end.
//!
//! Validate, stage, then provision + upload + verify for every destination.
//! Each destination is its own fault domain: its failure becomes an outcome
//! in the report and the next destination still runs. The staging directory
//! is released on every path out of [`BackupOrchestrator::run`], including
//! interruption.

use crate::archive::crypto::{self, KdfParams};
use crate::archive::walker::NamingOptions;
use crate::archive::{check_sources, ArchiveEncryptor};
use crate::config::Config;
use crate::dav::{ClientSettings, DavClient, Netrc, RemoteDirectoryProvisioner, RetryPolicy, UploadSession};
use crate::job::{BackupJob, Destination, DestinationOutcome, JobReport};
use crate::staging::StagingArea;
use crate::transfer::format_bytes;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Local};
use futures_util::{stream, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct BackupOrchestrator {
    config: Config,
    cancel: CancellationToken,
    staging_parent: Option<PathBuf>,
}

impl BackupOrchestrator {
    pub fn new(config: Config, cancel: CancellationToken) -> Self {
        Self {
            config,
            cancel,
            staging_parent: None,
        }
    }

    /// Create staging directories under `parent` instead of the system temp dir.
    pub fn with_staging_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.staging_parent = Some(parent.into());
        self
    }

    /// Run the job, timestamped now.
    pub async fn run(&self) -> Result<JobReport> {
        self.run_at(Local::now()).await
    }

    /// Run the job as if it started at `started_at`.
    pub async fn run_at(&self, started_at: DateTime<Local>) -> Result<JobReport> {
        let job = BackupJob::from_config(&self.config, started_at);
        info!(
            "Starting backup {} ({} sources, {} destinations)",
            job.artifact_name(),
            job.sources.len(),
            self.config.destinations.len()
        );

        info!("Validating configuration and local files");
        let netrc = self.preflight(&job)?;

        let mut staging = match &self.staging_parent {
            Some(parent) => StagingArea::acquire_in(parent)?,
            None => StagingArea::acquire()?,
        };

        let result = self.deliver(&job, &staging, netrc).await;
        staging.release();
        result
    }

    /// Everything that can fail before a byte is written or sent.
    fn preflight(&self, job: &BackupJob) -> Result<Netrc> {
        self.config.validate()?;
        check_sources(&job.sources)?;
        crypto::load_passphrase(&self.config.credentials.passphrase_file)?;
        let netrc = Netrc::load(&self.config.credentials.netrc_file)?;
        if netrc.is_empty() {
            warn!(
                "Credentials file {} has no entries",
                self.config.credentials.netrc_file.display()
            );
        }
        Ok(netrc)
    }

    async fn deliver(&self, job: &BackupJob, staging: &StagingArea, netrc: Netrc) -> Result<JobReport> {
        let artifact_name = job.artifact_name();
        let artifact = staging.artifact_path(&artifact_name);

        info!("Archiving and encrypting {} source(s)", job.sources.len());
        let started = Instant::now();
        let artifact_size = self.stage_artifact(job, &artifact).await?;
        info!(
            "Artifact {} ready: {} in {:.1}s",
            artifact_name,
            format_bytes(artifact_size),
            started.elapsed().as_secs_f64()
        );

        let client = DavClient::new(&self.client_settings(), netrc)?;
        let destinations = Destination::from_config(&self.config, job);
        let total = destinations.len();

        let deliveries: Vec<_> = destinations
            .iter()
            .enumerate()
            .map(|(index, destination)| {
                self.deliver_to(&client, destination, index + 1, total, &artifact, &artifact_name, artifact_size)
            })
            .collect();
        let mut fan_out = pin!(stream::iter(deliveries)
            .buffered(self.config.upload.parallel_destinations.max(1)));

        // In-flight requests are simply dropped on interruption.
        let mut outcomes = Vec::with_capacity(total);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!("Interrupted: {}", partial_tally(&outcomes, total));
                    return Err(BackupError::Interrupted);
                }
                next = fan_out.next() => match next {
                    Some(outcome) => outcomes.push(outcome),
                    None => break,
                },
            }
        }

        // the pinned stream still borrows the name until the end of scope
        Ok(JobReport {
            artifact_name: artifact_name.clone(),
            artifact_size,
            outcomes,
        })
    }

    /// Not raced against the cancel token: the blocking task watches the
    /// token itself, and staging must not be released while it still writes.
    async fn stage_artifact(&self, job: &BackupJob, artifact: &Path) -> Result<u64> {
        let encryptor = ArchiveEncryptor::new(
            KdfParams::with_log_n(self.config.encryption.kdf_log_n),
            NamingOptions {
                preserve_absolute_paths: self.config.job.preserve_absolute_paths,
            },
            self.cancel.clone(),
        );
        let sources = job.sources.clone();
        let passphrase_file = self.config.credentials.passphrase_file.clone();
        let output = artifact.to_path_buf();

        tokio::task::spawn_blocking(move || encryptor.produce(&sources, &passphrase_file, &output))
            .await
            .map_err(|e| BackupError::ArchiveFailed(format!("archive task did not complete: {}", e)))?
    }

    fn client_settings(&self) -> ClientSettings {
        let upload = &self.config.upload;
        ClientSettings {
            connect_timeout: Duration::from_secs(upload.connect_timeout_secs),
            timeout: (upload.timeout_secs > 0).then(|| Duration::from_secs(upload.timeout_secs)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn deliver_to(
        &self,
        client: &DavClient,
        destination: &Destination,
        index: usize,
        total: usize,
        artifact: &Path,
        artifact_name: &str,
        artifact_size: u64,
    ) -> DestinationOutcome {
        info!("[{}/{}] Destination {}", index, total, destination.name);
        if !client.has_credentials(&destination.base_url) {
            warn!(
                "No credentials for {}, sending requests unauthenticated",
                destination.name
            );
        }

        match self
            .run_destination(client, destination, artifact, artifact_name, artifact_size)
            .await
        {
            Ok(()) => {
                info!("[{}/{}] {} succeeded", index, total, destination.name);
                DestinationOutcome::succeeded(destination)
            }
            Err(e) => {
                error!(
                    destination = %destination.name,
                    kind = e.kind(),
                    "[{}/{}] {} failed: {}",
                    index,
                    total,
                    destination.name,
                    e
                );
                DestinationOutcome::failed(destination, e)
            }
        }
    }

    /// Provision, upload, verify. The remote directory comes from the
    /// destination so all three steps agree on it.
    async fn run_destination(
        &self,
        client: &DavClient,
        destination: &Destination,
        artifact: &Path,
        artifact_name: &str,
        artifact_size: u64,
    ) -> Result<()> {
        info!("Provisioning {}/{}", destination.base_url, destination.remote_dir);
        RemoteDirectoryProvisioner::new(client, self.config.provision.strategy)
            .ensure(&destination.base_url, &destination.remote_dir)
            .await?;

        let url = destination.object_url(artifact_name);
        let session = UploadSession::new(
            client,
            RetryPolicy {
                max_attempts: self.config.upload.max_attempts,
                delay: self.config.retry_delay(),
            },
        );
        let attempt = session.upload(artifact, &url).await?;
        info!("Uploaded {} on attempt {}", url, attempt);

        session.verify(&url, artifact_size).await?;
        info!("Verified {}", url);
        Ok(())
    }
}

/// Where an interrupted run got to, e.g. `1/3 destinations finished (1 succeeded, 0 failed)`.
fn partial_tally(outcomes: &[DestinationOutcome], total: usize) -> String {
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    let mut line = format!(
        "{}/{} destinations finished ({} succeeded, {} failed)",
        outcomes.len(),
        total,
        succeeded,
        outcomes.len() - succeeded
    );
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.destination.as_str())
        .collect();
    if !failed.is_empty() {
        line.push_str(&format!("; failed: {}", failed.join(", ")));
    }
    line
}

/// Log the end-of-run summary.
pub fn log_summary(report: &JobReport) {
    if report.is_success() {
        info!(
            "Summary: {}/{} destinations succeeded ({}, {})",
            report.succeeded(),
            report.total(),
            report.artifact_name,
            format_bytes(report.artifact_size)
        );
        return;
    }
    error!(
        "Summary: {}/{} destinations succeeded, {} failed",
        report.succeeded(),
        report.total(),
        report.total() - report.succeeded()
    );
    for outcome in report.failures() {
        if let Some(e) = &outcome.error {
            error!("  failed: {} ({})", outcome.destination, e);
        }
    }
}
