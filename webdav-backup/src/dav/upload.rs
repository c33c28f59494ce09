//! Upload with bounded retry, then trust-but-verify.

use super::client::{content_length, describe_transport, DavClient};
use super::status::{classify, DavRequest, StatusClass};
use crate::utils::errors::{BackupError, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between attempts, never after the last one
    pub delay: Duration,
}

pub struct UploadSession<'a> {
    client: &'a DavClient,
    policy: RetryPolicy,
}

impl<'a> UploadSession<'a> {
    pub fn new(client: &'a DavClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// PUT `local` to `url`, retrying every failure until the attempt budget
    /// runs out. Returns the attempt that succeeded.
    pub async fn upload(&self, local: &Path, url: &str) -> Result<u32> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            info!("Uploading to {} (attempt {}/{})", url, attempt, max_attempts);
            match self.client.put_file(url, local).await {
                Ok(response) => match classify(DavRequest::Upload, response.status) {
                    StatusClass::Created => return Ok(attempt),
                    _ => {
                        last_error = format!("HTTP {}: {}", response.status.as_u16(), response.body_excerpt());
                    }
                },
                // A dropped connection mid-body lands here too and is retried
                // like any other transport failure.
                Err(BackupError::Transport { source, .. }) => {
                    last_error = format!("{}: {}", describe_transport(&source), source);
                }
                // Local I/O: another attempt will not help
                Err(e) => return Err(e),
            }

            warn!(
                "Upload attempt {}/{} to {} failed: {}",
                attempt, max_attempts, url, last_error
            );
            if attempt < max_attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Err(BackupError::UploadFailed {
            url: url.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }

    /// Confirm the object is really there. When the server reports a size it
    /// must match `expected_size`.
    pub async fn verify(&self, url: &str, expected_size: u64) -> Result<()> {
        let verify_error = |reason: String| BackupError::Verify {
            url: url.to_string(),
            reason,
        };

        let response = match self.client.probe(url).await {
            Ok(response) => response,
            Err(BackupError::Transport { source, .. }) => {
                return Err(verify_error(format!("{}: {}", describe_transport(&source), source)))
            }
            Err(e) => return Err(e),
        };

        if classify(DavRequest::Verify, response.status) != StatusClass::Exists {
            return Err(verify_error(format!(
                "HTTP {}: {}",
                response.status.as_u16(),
                response.body_excerpt()
            )));
        }

        match response.body.as_deref().and_then(content_length) {
            Some(remote) if remote != expected_size => Err(verify_error(format!(
                "size mismatch: remote {} bytes, local {} bytes",
                remote, expected_size
            ))),
            Some(_) => Ok(()),
            None => {
                debug!("No size reported for {}, accepting status {}", url, response.status);
                Ok(())
            }
        }
    }
}
