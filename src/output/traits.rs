//! Save sink trait and output errors
//!
//! A sink receives the finished, deduplicated result of a harvest and
//! persists it. Sinks run once per harvest, after every worker has stopped.

use crate::crawler::HarvestOutcome;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for a finished harvest
pub trait SaveSink {
    /// Persists the records of one harvest
    ///
    /// Partial harvests are saved too; `outcome.complete` tells them apart.
    fn save(&mut self, outcome: &HarvestOutcome) -> OutputResult<()>;

    /// Human-readable destination, for log lines
    fn describe(&self) -> String;
}
