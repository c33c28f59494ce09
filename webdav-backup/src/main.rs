//! WebDAV Backup - Main entry point
//!
//! Runs a single backup job and exits. Exit status is 0 only when every
//! destination holds a verified copy of the artifact.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use webdav_backup::config::{Config, Overrides};
use webdav_backup::orchestrator::{self, BackupOrchestrator};
use webdav_backup::shutdown::ShutdownCoordinator;
use webdav_backup::utils;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// File or directory to back up (repeatable, replaces configured sources)
    #[arg(short, long = "source", value_name = "PATH")]
    sources: Vec<PathBuf>,

    /// WebDAV base URL (repeatable, replaces configured destinations)
    #[arg(short, long = "destination", value_name = "URL")]
    destinations: Vec<String>,

    /// File holding the encryption passphrase
    #[arg(long, value_name = "FILE")]
    passphrase_file: Option<PathBuf>,

    /// netrc file with WebDAV credentials
    #[arg(long, value_name = "FILE")]
    netrc_file: Option<PathBuf>,

    /// Artifact filename prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Upload attempts per destination
    #[arg(long)]
    retries: Option<u32>,

    /// Seconds to wait between upload attempts
    #[arg(long, value_name = "SECS")]
    retry_delay: Option<u64>,

    /// Destinations to serve concurrently
    #[arg(long)]
    parallel: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            sources: self.sources.clone(),
            destinations: self.destinations.clone(),
            passphrase_file: self.passphrase_file.clone(),
            netrc_file: self.netrc_file.clone(),
            prefix: self.prefix.clone(),
            max_attempts: self.retries,
            retry_delay_secs: self.retry_delay,
            parallel_destinations: self.parallel,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: failed to load {}: {:#}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    config.apply(args.overrides());

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    if let Err(e) = utils::logger::init(log_level) {
        eprintln!("Error: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(config));
    // Blocking archive work notices cancellation on its own; don't wait forever.
    runtime.shutdown_timeout(Duration::from_secs(5));
    ExitCode::from(code)
}

async fn run(config: Config) -> u8 {
    tracing::info!("Starting webdav-backup v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let coordinator = ShutdownCoordinator::new(cancel.clone());
    let signal_watcher = tokio::spawn(async move {
        coordinator.wait_for_signal().await;
    });

    let code = match BackupOrchestrator::new(config, cancel.clone()).run().await {
        Ok(report) => {
            orchestrator::log_summary(&report);
            report.exit_code()
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), "Backup aborted: {}", e);
            1
        }
    };

    signal_watcher.abort();
    code
}
