//! WebDAV Backup Library
//!
//! Archives local paths, encrypts the archive and pushes it to one or more
//! WebDAV servers, each treated as an independent destination.

pub mod archive;
pub mod config;
pub mod dav;
pub mod job;
pub mod orchestrator;
pub mod shutdown;
pub mod staging;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use job::JobReport;
pub use orchestrator::BackupOrchestrator;
pub use utils::errors::{BackupError, Result};
