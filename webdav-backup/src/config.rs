//! Configuration management for the backup job.
//!
//! Loaded from a TOML file, then overridden by command-line flags. The
//! resulting [`Config`] is immutable for the lifetime of a job.

use crate::archive::crypto::KdfParams;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub job: JobConfig,

    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub provision: ProvisionConfig,

    #[serde(default)]
    pub encryption: EncryptionConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Files and directories to back up
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    /// Artifact filename prefix
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Store entries under their absolute path instead of relative to their parent
    #[serde(default)]
    pub preserve_absolute_paths: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// WebDAV base URL, e.g. `https://dav.example.com/files/user`
    pub url: String,

    /// Identifier used in logs and the summary (defaults to the URL)
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// File whose first line is the encryption passphrase
    #[serde(default = "default_passphrase_file")]
    pub passphrase_file: PathBuf,

    /// netrc-style file with WebDAV logins
    #[serde(default = "default_netrc_file")]
    pub netrc_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Upload attempts per destination
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between upload attempts
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout, 0 disables it
    #[serde(default)]
    pub timeout_secs: u64,

    /// Destinations processed at once (1 = strictly sequential)
    #[serde(default = "default_parallel_destinations")]
    pub parallel_destinations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStrategy {
    /// PROPFIND each segment, MKCOL only the missing ones
    #[default]
    ProbeThenCreate,
    /// MKCOL every segment and accept "already exists"
    CreateOptimistically,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub strategy: ProvisionStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// scrypt cost parameter (log2 N)
    #[serde(default = "default_kdf_log_n")]
    pub kdf_log_n: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_prefix() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "host".to_string());
    format!("{}-backup", host)
}

fn home_file(name: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(name)
}

fn default_passphrase_file() -> PathBuf {
    home_file(".backup-passphrase")
}

fn default_netrc_file() -> PathBuf {
    home_file(".netrc")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_parallel_destinations() -> usize {
    1
}

fn default_kdf_log_n() -> u8 {
    17
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            prefix: default_prefix(),
            preserve_absolute_paths: false,
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            passphrase_file: default_passphrase_file(),
            netrc_file: default_netrc_file(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: 0,
            parallel_destinations: default_parallel_destinations(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            kdf_log_n: default_kdf_log_n(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            job: JobConfig::default(),
            destinations: Vec::new(),
            credentials: CredentialsConfig::default(),
            upload: UploadConfig::default(),
            provision: ProvisionConfig::default(),
            encryption: EncryptionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub sources: Vec<PathBuf>,
    pub destinations: Vec<String>,
    pub passphrase_file: Option<PathBuf>,
    pub netrc_file: Option<PathBuf>,
    pub prefix: Option<String>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub parallel_destinations: Option<usize>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply command-line overrides. Non-empty source or destination lists
    /// replace the configured ones instead of extending them.
    pub fn apply(&mut self, overrides: Overrides) {
        if !overrides.sources.is_empty() {
            self.job.sources = overrides.sources;
        }
        if !overrides.destinations.is_empty() {
            self.destinations = overrides
                .destinations
                .into_iter()
                .map(|url| DestinationConfig { url, name: None })
                .collect();
        }
        if let Some(path) = overrides.passphrase_file {
            self.credentials.passphrase_file = path;
        }
        if let Some(path) = overrides.netrc_file {
            self.credentials.netrc_file = path;
        }
        if let Some(prefix) = overrides.prefix {
            self.job.prefix = prefix;
        }
        if let Some(attempts) = overrides.max_attempts {
            self.upload.max_attempts = attempts;
        }
        if let Some(delay) = overrides.retry_delay_secs {
            self.upload.retry_delay_secs = delay;
        }
        if let Some(parallel) = overrides.parallel_destinations {
            self.upload.parallel_destinations = parallel;
        }
    }

    /// Structural checks only; filesystem checks happen at job pre-flight.
    pub fn validate(&self) -> Result<()> {
        if self.job.sources.is_empty() {
            return Err(BackupError::Config("no source paths configured".to_string()));
        }
        if self.destinations.is_empty() {
            return Err(BackupError::Config("no destinations configured".to_string()));
        }
        if self.job.prefix.is_empty() || self.job.prefix.contains('/') {
            return Err(BackupError::Config(format!(
                "invalid filename prefix {:?}",
                self.job.prefix
            )));
        }
        if self.upload.max_attempts == 0 {
            return Err(BackupError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.upload.parallel_destinations == 0 {
            return Err(BackupError::Config(
                "parallel_destinations must be at least 1".to_string(),
            ));
        }
        KdfParams::with_log_n(self.encryption.kdf_log_n)
            .check()
            .map_err(BackupError::Config)?;
        for dest in &self.destinations {
            let parsed = reqwest::Url::parse(&dest.url).map_err(|e| {
                BackupError::Config(format!("invalid destination URL {}: {}", dest.url, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(BackupError::Config(format!(
                    "destination {} is not an http(s) URL",
                    dest.url
                )));
            }
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.upload.retry_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[job]
sources = ["/data", "/etc/app.conf"]
prefix = "codex-backup"

[[destinations]]
url = "https://dav.example.com/files/u"
name = "primary"

[[destinations]]
url = "https://backup.example.org/dav/"

[credentials]
passphrase_file = "/root/.backup-passphrase"
netrc_file = "/root/.netrc"

[upload]
max_attempts = 5
retry_delay_secs = 2

[provision]
strategy = "create-optimistically"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.job.sources.len(), 2);
        assert_eq!(config.job.prefix, "codex-backup");
        assert_eq!(config.destinations.len(), 2);
        assert_eq!(config.destinations[0].name.as_deref(), Some("primary"));
        assert_eq!(config.destinations[1].name, None);
        assert_eq!(config.upload.max_attempts, 5);
        assert_eq!(config.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.upload.parallel_destinations, 1);
        assert_eq!(config.provision.strategy, ProvisionStrategy::CreateOptimistically);
        assert_eq!(config.encryption.kdf_log_n, 17);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.upload.retry_delay_secs, 10);
        assert_eq!(config.provision.strategy, ProvisionStrategy::ProbeThenCreate);
        assert!(config.job.prefix.ends_with("-backup"));
        assert!(config.credentials.netrc_file.ends_with(".netrc"));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_overrides_replace_lists() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.apply(Overrides {
            sources: vec![PathBuf::from("/srv")],
            destinations: vec!["http://localhost:8080/dav".to_string()],
            max_attempts: Some(1),
            prefix: Some("nightly".to_string()),
            ..Default::default()
        });

        assert_eq!(config.job.sources, vec![PathBuf::from("/srv")]);
        assert_eq!(config.destinations.len(), 1);
        assert_eq!(config.destinations[0].url, "http://localhost:8080/dav");
        assert_eq!(config.upload.max_attempts, 1);
        assert_eq!(config.job.prefix, "nightly");
        // untouched values survive
        assert_eq!(config.upload.retry_delay_secs, 2);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.upload.max_attempts = 0;
        assert!(matches!(config.validate(), Err(BackupError::Config(_))));

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.destinations[0].url = "ftp://example.com".to_string();
        assert!(matches!(config.validate(), Err(BackupError::Config(_))));

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.job.prefix = "a/b".to_string();
        assert!(matches!(config.validate(), Err(BackupError::Config(_))));

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.job.sources.clear();
        assert!(matches!(config.validate(), Err(BackupError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unusable_kdf_cost() {
        let config = Config::from_toml(&format!("{}\n[encryption]\nkdf_log_n = 64\n", SAMPLE)).unwrap();
        assert!(matches!(config.validate(), Err(BackupError::Config(m)) if m.contains("kdf_log_n")));

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.encryption.kdf_log_n = 0;
        assert!(matches!(config.validate(), Err(BackupError::Config(_))));
    }
}
