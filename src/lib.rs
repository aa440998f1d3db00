//! Arctic-Harvest: a resilient crawler for rate-limited Reddit archive APIs
//!
//! This crate implements a fetch engine that retrieves every record matching a
//! query without exceeding the provider's request budget, survives transient
//! failures, resolves duplicate/edited/deleted records deterministically, and
//! optionally fans out to fetch each post's comment tree.

pub mod config;
pub mod crawler;
pub mod output;
pub mod record;
pub mod recovery;
pub mod shutdown;

use thiserror::Error;

/// Main error type for Arctic-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl HarvestError {
    /// Whether this error means a unit of work ran out of retries.
    ///
    /// Callers downgrade this case to a partial result instead of failing
    /// the whole fetch.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, HarvestError::RetriesExhausted { .. })
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid timestamp for '{field}': {value}")]
    InvalidTimestamp { field: String, value: String },
}

/// Result type alias for Arctic-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, DuplicatePolicy, Endpoint, FetchSettings};
pub use crawler::{ApiClient, HarvestOutcome, Harvester, RateBudget, RetryPolicy};
pub use record::{index_records, is_deleted, Record, RecordIndex};
pub use shutdown::Shutdown;
