//! Utility modules shared across the pipeline.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
