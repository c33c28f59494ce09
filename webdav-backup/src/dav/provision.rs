//! Remote directory provisioning.
//!
//! Walks `backups/2025-06` as `backups`, then `backups/2025-06`, making sure
//! each level exists as a collection. Stops at the first failure and never
//! retries; the destination is simply marked failed.

use super::client::DavClient;
use super::status::{classify, is_ready, DavRequest, StatusClass};
use crate::config::ProvisionStrategy;
use crate::utils::errors::{BackupError, Result};
use tracing::{debug, info};

/// Cumulative paths for each segment of `relative_dir`, empty segments dropped.
pub fn segment_paths(relative_dir: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut cumulative = String::new();
    for segment in relative_dir.split('/').filter(|s| !s.is_empty()) {
        if !cumulative.is_empty() {
            cumulative.push('/');
        }
        cumulative.push_str(segment);
        paths.push(cumulative.clone());
    }
    paths
}

pub struct RemoteDirectoryProvisioner<'a> {
    client: &'a DavClient,
    strategy: ProvisionStrategy,
}

impl<'a> RemoteDirectoryProvisioner<'a> {
    pub fn new(client: &'a DavClient, strategy: ProvisionStrategy) -> Self {
        Self { client, strategy }
    }

    /// Make sure every segment of `relative_dir` exists under `base_url`.
    /// Returns how many collections were created.
    pub async fn ensure(&self, base_url: &str, relative_dir: &str) -> Result<usize> {
        let base_url = base_url.trim_end_matches('/');
        let mut created = 0;

        for path in segment_paths(relative_dir) {
            let url = format!("{}/{}", base_url, path);
            let made = match self.strategy {
                ProvisionStrategy::ProbeThenCreate => self.probe_then_create(&url).await?,
                ProvisionStrategy::CreateOptimistically => self.create(&url).await?,
            };
            if made {
                info!("Created remote collection {}", url);
                created += 1;
            } else {
                debug!("Remote collection {} already present", url);
            }
        }
        Ok(created)
    }

    async fn probe_then_create(&self, url: &str) -> Result<bool> {
        let probe = self.client.probe(url).await?;
        match classify(DavRequest::Probe, probe.status) {
            StatusClass::Exists => Ok(false),
            StatusClass::NotFound => self.create(url).await,
            _ => Err(BackupError::Provision {
                url: url.to_string(),
                status: probe.status.as_u16(),
                body: probe.body_excerpt(),
            }),
        }
    }

    /// MKCOL; `true` if the collection was created by this call.
    async fn create(&self, url: &str) -> Result<bool> {
        let response = self.client.make_collection(url).await?;
        let class = classify(DavRequest::MakeCollection, response.status);
        if is_ready(class) {
            return Ok(class == StatusClass::Created);
        }
        Err(BackupError::Provision {
            url: url.to_string(),
            status: response.status.as_u16(),
            body: response.body_excerpt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dav::test_server::{unreachable_base_url, FakeDav};
    use crate::dav::{ClientSettings, Netrc};

    fn client() -> DavClient {
        DavClient::new(&ClientSettings::default(), Netrc::default()).unwrap()
    }

    #[test]
    fn test_segment_paths() {
        assert_eq!(segment_paths("backups/2025-06"), vec!["backups", "backups/2025-06"]);
        assert_eq!(segment_paths("/a//b/c/"), vec!["a", "a/b", "a/b/c"]);
        assert!(segment_paths("").is_empty());
        assert!(segment_paths("///").is_empty());
    }

    #[tokio::test]
    async fn test_probe_then_create_is_idempotent() {
        let dav = FakeDav::start().await;
        let client = client();
        let provisioner = RemoteDirectoryProvisioner::new(&client, ProvisionStrategy::ProbeThenCreate);

        let created = provisioner.ensure(&dav.base_url, "backups/2025-06").await.unwrap();
        assert_eq!(created, 2);
        assert!(dav.has_collection("/dav/backups/2025-06"));

        dav.clear_requests();
        let created = provisioner.ensure(&dav.base_url, "backups/2025-06").await.unwrap();
        assert_eq!(created, 0);
        // second run only probes
        assert_eq!(
            dav.requests(),
            vec![
                ("PROPFIND".to_string(), "/dav/backups".to_string()),
                ("PROPFIND".to_string(), "/dav/backups/2025-06".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_optimistically_is_idempotent() {
        let dav = FakeDav::start().await;
        let client = client();
        let provisioner = RemoteDirectoryProvisioner::new(&client, ProvisionStrategy::CreateOptimistically);

        assert_eq!(provisioner.ensure(&dav.base_url, "backups/2025-06").await.unwrap(), 2);
        assert_eq!(provisioner.ensure(&dav.base_url, "backups/2025-06").await.unwrap(), 0);
        assert!(dav.has_collection("/dav/backups/2025-06"));
        assert!(dav.requests().iter().all(|(m, _)| m == "MKCOL"));
    }

    #[tokio::test]
    async fn test_short_circuits_on_first_failure() {
        let dav = FakeDav::start().await;
        dav.fail_mkcol("/dav/a/b");
        let client = client();
        let provisioner = RemoteDirectoryProvisioner::new(&client, ProvisionStrategy::ProbeThenCreate);

        let err = provisioner.ensure(&dav.base_url, "a/b/c/d").await.unwrap_err();
        match err {
            BackupError::Provision { url, status, body } => {
                assert!(url.ends_with("/dav/a/b"));
                assert_eq!(status, 500);
                assert!(body.contains("mkcol exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(dav.requests().iter().all(|(_, path)| !path.starts_with("/dav/a/b/c")));
        assert!(dav.has_collection("/dav/a"));
    }

    #[tokio::test]
    async fn test_unexpected_probe_status_is_provision_error() {
        let dav = FakeDav::start().await;
        dav.deny_propfind();
        let client = client();
        let provisioner = RemoteDirectoryProvisioner::new(&client, ProvisionStrategy::ProbeThenCreate);

        let err = provisioner.ensure(&dav.base_url, "backups").await.unwrap_err();
        assert!(matches!(err, BackupError::Provision { status: 403, .. }));
        assert!(dav.requests().iter().all(|(m, _)| m == "PROPFIND"));
    }

    #[tokio::test]
    async fn test_transport_failure_names_segment() {
        let base = unreachable_base_url();
        let client = client();
        let provisioner = RemoteDirectoryProvisioner::new(&client, ProvisionStrategy::ProbeThenCreate);

        let err = provisioner.ensure(&base, "backups/2025-06").await.unwrap_err();
        match err {
            BackupError::Transport { url, .. } => assert_eq!(url, format!("{}/backups", base)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
