use crate::config::settings::{Endpoint, FetchSettings};
use crate::config::types::{Config, EngineConfig, OutputConfig, ProviderConfig, RequestConfig, TimeBound};
use crate::ConfigError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Filter keys the engine manages itself
const RESERVED_FILTERS: &[&str] = &["after", "before", "endpoint", "link_id"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_request_config(&config.request)?;
    validate_engine_config(&config.engine, config.request.endpoint)?;
    validate_provider_config(&config.provider)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the configuration and builds the engine's [`FetchSettings`]
///
/// Normalization happens here: time bounds become epoch seconds, a lone
/// `after` is closed with the current time, and filter values are flattened
/// to strings.
pub fn build_settings(config: &Config) -> Result<FetchSettings, ConfigError> {
    validate(config)?;

    let request = &config.request;
    let engine = &config.engine;

    let after = request
        .after
        .as_ref()
        .map(|bound| parse_time_bound("after", bound))
        .transpose()?;
    let mut before = request
        .before
        .as_ref()
        .map(|bound| parse_time_bound("before", bound))
        .transpose()?;

    match (after, before) {
        (Some(after), None) => {
            let now = Utc::now().timestamp();
            if after >= now {
                return Err(ConfigError::Validation(format!(
                    "'after' ({}) must be in the past when 'before' is omitted",
                    after
                )));
            }
            tracing::info!(
                "Only 'after' given, fetching from {} until now ({})",
                after,
                now
            );
            before = Some(now);
        }
        (None, Some(_)) => {
            tracing::warn!(
                "'before' is set but 'after' is not, only a single page of results will be fetched"
            );
        }
        (None, None) => {
            tracing::warn!(
                "No time range given, only a single page of results will be fetched"
            );
        }
        (Some(_), Some(_)) => {}
    }

    let mut filters = BTreeMap::new();
    for (key, value) in &request.filters {
        filters.insert(key.clone(), flatten_filter_value(key, value)?);
    }

    Ok(FetchSettings {
        endpoint: request.endpoint,
        after,
        before,
        workers: engine.workers,
        comment_workers: engine.comment_workers,
        interval: Duration::from_millis(engine.interval_ms),
        cooldown: Duration::from_millis(engine.cooldown_ms),
        max_retries: engine.max_retries,
        backoff_factor: engine.backoff_factor,
        retry_min_delay: Duration::from_millis(engine.retry_min_delay_ms),
        retry_max_delay: Duration::from_millis(engine.retry_max_delay_ms),
        duplicate_policy: engine.duplicate_policy,
        fetch_comments: engine.fetch_comments,
        queue_capacity: engine.queue_capacity,
        filters,
    })
}

/// Parses a configured time bound into epoch seconds (UTC)
///
/// Accepts epoch integers, numeric strings, RFC 3339 timestamps, naive
/// `YYYY-MM-DDTHH:MM:SS` timestamps (taken as UTC), and `YYYY-MM-DD` dates.
pub fn parse_time_bound(field: &str, bound: &TimeBound) -> Result<i64, ConfigError> {
    let invalid = |value: &str| ConfigError::InvalidTimestamp {
        field: field.to_string(),
        value: value.to_string(),
    };

    match bound {
        TimeBound::Epoch(epoch) if *epoch >= 0 => Ok(*epoch),
        TimeBound::Epoch(epoch) => Err(invalid(&epoch.to_string())),
        TimeBound::Text(text) => {
            let text = text.trim();
            if let Ok(epoch) = text.parse::<i64>() {
                return if epoch >= 0 { Ok(epoch) } else { Err(invalid(text)) };
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(dt.timestamp());
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
                return Ok(naive.and_utc().timestamp());
            }
            if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                    return Ok(midnight.and_utc().timestamp());
                }
            }
            Err(invalid(text))
        }
    }
}

/// Validates the request section
fn validate_request_config(config: &RequestConfig) -> Result<(), ConfigError> {
    let after = config
        .after
        .as_ref()
        .map(|bound| parse_time_bound("after", bound))
        .transpose()?;
    let before = config
        .before
        .as_ref()
        .map(|bound| parse_time_bound("before", bound))
        .transpose()?;

    if let (Some(after), Some(before)) = (after, before) {
        if after >= before {
            return Err(ConfigError::Validation(format!(
                "'after' ({}) must be less than 'before' ({})",
                after, before
            )));
        }
    }

    for key in config.filters.keys() {
        if RESERVED_FILTERS.contains(&key.as_str()) {
            return Err(ConfigError::Validation(format!(
                "filter '{}' is managed by the engine and cannot be set directly",
                key
            )));
        }
        if key.is_empty() {
            return Err(ConfigError::Validation(
                "filter names cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates engine tuning
fn validate_engine_config(config: &EngineConfig, endpoint: Endpoint) -> Result<(), ConfigError> {
    if config.workers < 1 {
        return Err(ConfigError::Validation(format!(
            "workers must be >= 1, got {}",
            config.workers
        )));
    }

    if config.comment_workers < 1 {
        return Err(ConfigError::Validation(format!(
            "comment-workers must be >= 1, got {}",
            config.comment_workers
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    if !config.backoff_factor.is_finite() || config.backoff_factor < 0.0 {
        return Err(ConfigError::Validation(format!(
            "backoff-factor must be a non-negative number, got {}",
            config.backoff_factor
        )));
    }

    if config.retry_min_delay_ms > config.retry_max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry-min-delay-ms ({}) cannot exceed retry-max-delay-ms ({})",
            config.retry_min_delay_ms, config.retry_max_delay_ms
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue-capacity must be >= 1".to_string(),
        ));
    }

    if config.fetch_comments && endpoint != Endpoint::Posts {
        return Err(ConfigError::Validation(format!(
            "fetch-comments is only supported for the posts endpoint, not '{}'",
            endpoint
        )));
    }

    Ok(())
}

/// Validates provider settings
fn validate_provider_config(config: &ProviderConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.path.is_empty() {
        return Err(ConfigError::Validation("output path cannot be empty".to_string()));
    }

    if config.recovery_dir.is_empty() {
        return Err(ConfigError::Validation(
            "recovery-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Flattens a TOML filter value into the provider's string form
fn flatten_filter_value(key: &str, value: &toml::Value) -> Result<String, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(dt) => Ok(dt.to_string()),
        toml::Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| match item {
                    toml::Value::Array(_) | toml::Value::Table(_) => {
                        Err(ConfigError::Validation(format!(
                            "filter '{}' cannot contain nested arrays or tables",
                            key
                        )))
                    }
                    other => flatten_filter_value(key, other),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(parts.join(","))
        }
        toml::Value::Table(_) => Err(ConfigError::Validation(format!(
            "filter '{}' cannot be a table",
            key
        ))),
    }
}
