use crate::config::settings::{DuplicatePolicy, Endpoint};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Arctic-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub request: RequestConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    pub output: OutputConfig,
}

/// What to fetch
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// Search endpoint to query
    pub endpoint: Endpoint,

    /// Lower time bound (epoch seconds, RFC 3339, or YYYY-MM-DD)
    #[serde(default)]
    pub after: Option<TimeBound>,

    /// Upper time bound (epoch seconds, RFC 3339, or YYYY-MM-DD)
    #[serde(default)]
    pub before: Option<TimeBound>,

    /// Provider-specific filter fields, passed through verbatim
    #[serde(default)]
    pub filters: BTreeMap<String, toml::Value>,
}

/// A time bound as written in the config file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimeBound {
    Epoch(i64),
    Text(String),
}

/// Fetch engine tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent time segments
    pub workers: usize,

    /// Number of concurrent comment-tree consumers
    #[serde(rename = "comment-workers")]
    pub comment_workers: usize,

    /// Minimum spacing between requests (milliseconds)
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,

    /// Cooldown after HTTP 429 when the provider sends no reset header (milliseconds)
    #[serde(rename = "cooldown-ms")]
    pub cooldown_ms: u64,

    /// Maximum attempts per request
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Multiplier for exponential backoff
    #[serde(rename = "backoff-factor")]
    pub backoff_factor: f64,

    /// Lower bound of a single backoff sleep (milliseconds)
    #[serde(rename = "retry-min-delay-ms")]
    pub retry_min_delay_ms: u64,

    /// Upper bound of a single backoff sleep (milliseconds)
    #[serde(rename = "retry-max-delay-ms")]
    pub retry_max_delay_ms: u64,

    /// How to resolve records that share an id
    #[serde(rename = "duplicate-policy")]
    pub duplicate_policy: DuplicatePolicy,

    /// Fetch the comment tree of every post
    #[serde(rename = "fetch-comments")]
    pub fetch_comments: bool,

    /// Capacity of the comment fanout queue
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            comment_workers: 3,
            interval_ms: 500,
            cooldown_ms: 5000,
            max_retries: 10,
            backoff_factor: 1.0,
            retry_min_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            duplicate_policy: DuplicatePolicy::KeepNewest,
            fetch_comments: false,
            queue_capacity: 1024,
        }
    }
}

/// Provider connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API root; endpoint paths are joined onto it
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Tokens held back from the provider's reported remaining quota
    #[serde(rename = "safety-margin")]
    pub safety_margin: u32,

    /// Upper bound on the pacer's spacing between requests (seconds)
    #[serde(rename = "max-pace-secs")]
    pub max_pace_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://arctic-shift.photon-reddit.com/api/".to_string(),
            user_agent: format!("arctic-harvest/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            safety_margin: 1,
            max_pace_secs: 60,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Where the finished result is written
    pub path: String,

    /// Result format
    #[serde(default)]
    pub format: OutputFormat,

    /// Parent directory for crash-recovery artifacts
    #[serde(rename = "recovery-dir", default = "default_recovery_dir")]
    pub recovery_dir: String,
}

fn default_recovery_dir() -> String {
    ".".to_string()
}

/// Supported result formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Sqlite,
}
