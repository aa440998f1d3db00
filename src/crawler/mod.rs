//! Fetch engine for the archive provider
//!
//! This module contains the core harvesting logic, including:
//! - The adaptive rate budget shared by all workers
//! - Retry with exponential backoff and jitter
//! - Single page requests and cursor pagination over time windows
//! - Concurrent time segments and the comment-tree fanout
//! - Overall harvest coordination

mod budget;
mod coordinator;
mod fanout;
mod fetcher;
mod retry;
mod segment;
mod window;

pub use budget::RateBudget;
pub use coordinator::{HarvestOutcome, Harvester};
pub use fanout::{CommentFanout, FanoutResult, LinkQueue, QueueItem};
pub use fetcher::{
    build_http_client, fetch_once, ApiClient, Page, PageSource, REMAINING_HEADER, RESET_HEADER,
};
pub use retry::{Outcome, RetryPolicy, RetryReason};
pub use segment::{merge_segments, split_range, MergedResult, SegmentOrchestrator};
pub use window::{fetch_time_window, SegmentResult, WindowContext};

use crate::config::{Config, FetchSettings};
use crate::Result;
use std::sync::Arc;

/// Builds a harvester for a loaded configuration
///
/// This is the main entry point used by the binary. It will:
/// 1. Build the HTTP client and a fresh rate budget
/// 2. Point the provider client at the configured base URL
/// 3. Place recovery files under the configured directory
///
/// # Arguments
///
/// * `config` - The loaded configuration
/// * `settings` - Settings validated from `config`
///
/// # Returns
///
/// * `Ok(Harvester)` - Ready to run
/// * `Err(HarvestError)` - The HTTP client or base URL was invalid
pub fn harvester_from_config(config: &Config, settings: FetchSettings) -> Result<Harvester> {
    let client = ApiClient::from_config(&config.provider, &settings)?;
    Ok(Harvester::new(Arc::new(client), settings)
        .with_recovery_parent(config.output.recovery_dir.clone()))
}
