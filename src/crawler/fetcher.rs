//! HTTP page fetcher
//!
//! This module handles all requests to the archive provider, including:
//! - Building HTTP clients with the configured user agent and timeout
//! - Waiting on the shared rate budget before every request
//! - Classifying responses into success, retryable and fatal outcomes
//! - Feeding rate-limit headers back into the budget
//! - Seeding the comment fanout queue with fetched post ids

use crate::config::{FetchSettings, PageQuery, ProviderConfig};
use crate::crawler::budget::RateBudget;
use crate::crawler::fanout::LinkQueue;
use crate::crawler::retry::{Outcome, RetryReason};
use crate::record::{record_id, Record};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Remaining requests in the current window
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";

/// Seconds until the window resets
pub const RESET_HEADER: &str = "X-RateLimit-Reset";

/// One page of records in provider order (newest first)
pub type Page = Vec<Record>;

/// Something that can perform one attempt at fetching one page
///
/// [`ApiClient`] talks to the real provider; tests substitute scripted sources.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Performs exactly one attempt, without retrying
    async fn fetch_page(&self, query: &PageQuery) -> Outcome<Page>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The provider configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &ProviderConfig) -> std::result::Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Client for the archive provider's search and tree endpoints
///
/// Every request first waits on the shared [`RateBudget`], and every response
/// carrying rate-limit headers updates it.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    budget: Arc<RateBudget>,
    cooldown: Duration,
}

impl ApiClient {
    /// Creates a client for the provider rooted at `base_url`
    ///
    /// A missing trailing slash is added so endpoint paths resolve below it.
    pub fn new(client: Client, base_url: &str, budget: Arc<RateBudget>) -> Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
            budget,
            cooldown: Duration::from_secs(5),
        })
    }

    /// Builds the HTTP client, budget and provider client from configuration
    pub fn from_config(config: &ProviderConfig, settings: &FetchSettings) -> Result<Self> {
        let client = build_http_client(config)?;
        let budget = Arc::new(RateBudget::new(
            config.safety_margin,
            settings.interval,
            Duration::from_secs(config.max_pace_secs),
        ));
        Ok(Self::new(client, &config.base_url, budget)?.with_cooldown(settings.cooldown))
    }

    /// Sets the pause used after HTTP 429 when no reset header is sent
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn budget(&self) -> &Arc<RateBudget> {
        &self.budget
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Waits out the shared cooldown announced by an HTTP 429
    async fn handle_rate_limited(&self, url: &Url, headers: &HeaderMap) {
        let cooldown = header_f64(headers, RESET_HEADER)
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(self.cooldown);
        tracing::warn!(
            "Rate limit reached on {}, all workers pausing for {:?}",
            url,
            cooldown
        );
        self.budget.pause_for(cooldown).await;
    }

    /// Feeds rate-limit headers back into the budget
    fn observe_headers(&self, url: &Url, headers: &HeaderMap) {
        match (
            header_f64(headers, REMAINING_HEADER),
            header_f64(headers, RESET_HEADER),
        ) {
            (Some(remaining), Some(reset)) => {
                let remaining = remaining.max(0.0).min(u32::MAX as f64) as u32;
                self.budget.update(remaining, reset);
            }
            _ => tracing::debug!("No rate-limit headers on response from {}", url),
        }
    }
}

#[async_trait]
impl PageSource for ApiClient {
    async fn fetch_page(&self, query: &PageQuery) -> Outcome<Page> {
        let url = match self.base_url.join(query.endpoint.path()) {
            Ok(url) => url,
            Err(e) => return Outcome::Fatal(e.into()),
        };

        self.budget.acquire().await;

        let response = match self.client.get(url.clone()).query(&query.params).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Outcome::Fatal(HarvestError::Http {
                    url: url.to_string(),
                    source: e,
                })
            }
            Err(e) => return Outcome::Retryable(RetryReason::Transport(e.to_string())),
        };

        let status = response.status();
        let headers = response.headers().clone();

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                self.observe_headers(&url, &headers);
                self.handle_rate_limited(&url, &headers).await;
                return Outcome::Retryable(RetryReason::RateLimited);
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(
                    "HTTP 422 from {}, retrying. Response body: {}",
                    url,
                    truncate(&body, 1000)
                );
                return Outcome::Retryable(RetryReason::Unprocessable);
            }
            s if !s.is_success() => {
                return Outcome::Fatal(HarvestError::Status {
                    url: url.to_string(),
                    status: s.as_u16(),
                })
            }
            _ => {}
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Outcome::Retryable(RetryReason::Transport(e.to_string())),
        };

        let records = match parse_envelope(&body) {
            Ok((records, 0)) => records,
            Ok((records, dropped)) => {
                tracing::warn!(
                    "Dropped {} non-object entries from `data` in response from {}",
                    dropped,
                    url
                );
                records
            }
            Err(message) => {
                return Outcome::Fatal(HarvestError::MalformedResponse {
                    url: url.to_string(),
                    message,
                })
            }
        };

        self.observe_headers(&url, &headers);

        tracing::info!(
            "Received {} records from {} (remaining: {}, reset: {})",
            records.len(),
            query.endpoint,
            header_str(&headers, REMAINING_HEADER).unwrap_or("?"),
            header_str(&headers, RESET_HEADER).unwrap_or("?")
        );

        Outcome::Success(records)
    }
}

/// Fetches one page with retries and optionally seeds the comment queue
///
/// # Arguments
///
/// * `source` - Where pages come from
/// * `settings` - Query and retry configuration, with the current cursor
/// * `queue` - When present, every fetched record's id is enqueued
///
/// # Returns
///
/// The page's records, [`HarvestError::RetriesExhausted`] when the attempt
/// cap is hit, or the first fatal error.
pub async fn fetch_once(
    source: &dyn PageSource,
    settings: &FetchSettings,
    queue: Option<&LinkQueue>,
) -> Result<Page> {
    let query = settings.to_query();
    let policy = settings.retry_policy();
    let label = describe(&query);

    let records = policy.run(&label, || source.fetch_page(&query)).await?;

    if let Some(queue) = queue {
        for record in &records {
            if let Some(id) = record_id(record) {
                queue.push(id).await;
            }
        }
    }

    Ok(records)
}

/// Extracts the `data` array from a response body
///
/// Returns the object records along with how many non-object entries were
/// dropped.
fn parse_envelope(body: &[u8]) -> std::result::Result<(Page, usize), String> {
    let envelope: Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid JSON: {}", e))?;

    let data = match envelope {
        Value::Object(mut map) => map.remove("data"),
        _ => None,
    };

    match data {
        Some(Value::Array(items)) => {
            let total = items.len();
            let records: Page = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(record) => Some(record),
                    _ => None,
                })
                .collect();
            let dropped = total - records.len();
            Ok((records, dropped))
        }
        Some(_) => Err("`data` is not an array".to_string()),
        None => Err("cannot find `data` in response".to_string()),
    }
}

fn describe(query: &PageQuery) -> String {
    match (query.params.get("after"), query.params.get("before")) {
        (Some(after), Some(before)) => format!("{} [{}, {}]", query.endpoint, after, before),
        _ => match query.params.get("link_id") {
            Some(link_id) => format!("{} for {}", query.endpoint, link_id),
            None => query.endpoint.to_string(),
        },
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    header_str(headers, name).and_then(|value| value.trim().parse::<f64>().ok())
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
