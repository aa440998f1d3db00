//! Validated fetch settings
//!
//! [`FetchSettings`] is built once by the validation layer and is read-only to
//! the engine, except that each time-window worker moves `before` on its own
//! copy as the pagination cursor advances.

use crate::crawler::RetryPolicy;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Page size requested for a comment tree; the whole tree comes back in one response.
pub const COMMENT_TREE_LIMIT: u32 = 25_000;

/// Provider endpoints the engine knows how to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// Post (submission) search
    Posts,
    /// Comment search
    Comments,
    /// Full comment tree of one post
    #[serde(skip_deserializing)]
    CommentTree,
}

impl Endpoint {
    /// Path of this endpoint relative to the API root
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Posts => "posts/search",
            Endpoint::Comments => "comments/search",
            Endpoint::CommentTree => "comments/tree",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// How to resolve several records sharing one id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the most recently seen record
    #[default]
    KeepNewest,
    /// Keep the first seen record
    KeepOldest,
    /// Drop every record of the group
    Remove,
    /// Prefer the record that does not look deleted
    KeepOriginal,
    /// Prefer the record that looks deleted
    KeepRemoved,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DuplicatePolicy::KeepNewest => "keep_newest",
            DuplicatePolicy::KeepOldest => "keep_oldest",
            DuplicatePolicy::Remove => "remove",
            DuplicatePolicy::KeepOriginal => "keep_original",
            DuplicatePolicy::KeepRemoved => "keep_removed",
        };
        f.write_str(name)
    }
}

/// One request's endpoint and flat query-parameter map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub endpoint: Endpoint,
    pub params: BTreeMap<String, String>,
}

/// Validated, normalized parameters for one fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub endpoint: Endpoint,

    /// Fixed lower bound (epoch seconds)
    pub after: Option<i64>,

    /// Upper bound (epoch seconds); the moving cursor inside a time window
    pub before: Option<i64>,

    /// Number of time segments fetched concurrently
    pub workers: usize,

    /// Number of comment-tree consumers
    pub comment_workers: usize,

    /// Minimum spacing between requests
    pub interval: Duration,

    /// Cooldown after HTTP 429 when no reset header is sent
    pub cooldown: Duration,

    /// Attempt cap per request
    pub max_retries: u32,

    pub backoff_factor: f64,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,

    pub duplicate_policy: DuplicatePolicy,

    /// Fetch each post's comment tree after retrieval
    pub fetch_comments: bool,

    /// Capacity of the comment fanout queue
    pub queue_capacity: usize,

    /// Provider filter fields passed through verbatim
    pub filters: BTreeMap<String, String>,
}

impl FetchSettings {
    /// Creates settings for `endpoint` with engine defaults and no time range
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            after: None,
            before: None,
            workers: 3,
            comment_workers: 3,
            interval: Duration::from_millis(500),
            cooldown: Duration::from_millis(5000),
            max_retries: 10,
            backoff_factor: 1.0,
            retry_min_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            duplicate_policy: DuplicatePolicy::KeepNewest,
            fetch_comments: false,
            queue_capacity: 1024,
            filters: BTreeMap::new(),
        }
    }

    /// Returns the `[after, before]` range when both bounds are present
    pub fn time_range(&self) -> Option<(i64, i64)> {
        match (self.after, self.before) {
            (Some(after), Some(before)) => Some((after, before)),
            _ => None,
        }
    }

    /// Serializes these settings into the provider's query form
    pub fn to_query(&self) -> PageQuery {
        let mut params = self.filters.clone();
        if let Some(after) = self.after {
            params.insert("after".to_string(), after.to_string());
        }
        if let Some(before) = self.before {
            params.insert("before".to_string(), before.to_string());
        }
        PageQuery {
            endpoint: self.endpoint,
            params,
        }
    }

    /// Settings for fetching the comment tree under one post
    ///
    /// Engine tuning is inherited; filters and time bounds are not.
    pub fn comment_tree(&self, link_id: &str) -> FetchSettings {
        let mut filters = BTreeMap::new();
        filters.insert("link_id".to_string(), link_id.to_string());
        filters.insert("limit".to_string(), COMMENT_TREE_LIMIT.to_string());

        FetchSettings {
            endpoint: Endpoint::CommentTree,
            after: None,
            before: None,
            fetch_comments: false,
            filters,
            ..self.clone()
        }
    }

    /// Retry policy described by these settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
            .with_backoff_factor(self.backoff_factor)
            .with_delay_bounds(self.retry_min_delay, self.retry_max_delay)
    }

    /// Short stable hash of the query, used to name recovery artifacts
    pub fn fingerprint(&self) -> String {
        let query = self.to_query();
        let mut hasher = Sha256::new();
        hasher.update(query.endpoint.path().as_bytes());
        for (key, value) in &query.params {
            hasher.update(b"\n");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        digest[..12].to_string()
    }
}
