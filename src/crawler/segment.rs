//! Time-segment partitioning and concurrent window fetches
//!
//! `[after, before]` is split into contiguous segments, one window worker per
//! segment. Segment 0 covers the oldest sub-range. Each worker pages newest
//! to oldest, so concatenating results from the highest index down yields
//! one globally newest-first list.

use crate::config::FetchSettings;
use crate::crawler::fanout::LinkQueue;
use crate::crawler::fetcher::{fetch_once, PageSource};
use crate::crawler::window::{fetch_time_window, SegmentResult, WindowContext};
use crate::record::Record;
use crate::recovery::RecoveryDir;
use crate::shutdown::SharedShutdown;
use crate::{HarvestError, Result};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Splits `[after, before]` into at most `workers` contiguous segments
///
/// Boundary `i` sits at `after + ceil(i * (before - after) / n)`; the last
/// segment ends exactly at `before`. Adjacent segments share their boundary.
/// Never produces more segments than there are seconds in the range.
///
/// # Examples
///
/// ```
/// use arctic_harvest::crawler::split_range;
///
/// assert_eq!(split_range(0, 10, 3), vec![(0, 4), (4, 7), (7, 10)]);
/// ```
pub fn split_range(after: i64, before: i64, workers: usize) -> Vec<(i64, i64)> {
    if before <= after {
        return vec![(after, before)];
    }

    let span = (before as i128) - (after as i128);
    let n = (workers.max(1) as i128).min(span);

    let boundary = |i: i128| -> i64 {
        let offset = (i * span + n - 1) / n;
        (after as i128 + offset) as i64
    };

    (0..n)
        .map(|i| {
            let start = boundary(i);
            let end = if i == n - 1 { before } else { boundary(i + 1) };
            (start, end)
        })
        .collect()
}

/// Merged output of every segment
#[derive(Debug, Clone, Default)]
pub struct MergedResult {
    /// Records, newest first
    pub records: Vec<Record>,

    /// Segments launched (1 for the single-page shortcut)
    pub segments: usize,

    /// Segments that returned early
    pub partial_segments: usize,

    /// Pages fetched across all segments
    pub pages: usize,
}

impl MergedResult {
    pub fn is_complete(&self) -> bool {
        self.partial_segments == 0
    }
}

/// Runs one window worker per segment and merges their results
pub struct SegmentOrchestrator {
    source: Arc<dyn PageSource>,
    queue: Option<Arc<LinkQueue>>,
    recovery: Arc<RecoveryDir>,
    shutdown: SharedShutdown,
}

impl SegmentOrchestrator {
    /// # Arguments
    ///
    /// * `source` - Shared page source (one HTTP client and one budget)
    /// * `queue` - Comment fanout queue to seed, if comments were requested
    /// * `recovery` - Directory for per-segment recovery files
    /// * `shutdown` - Cancellation signal observed by every worker
    pub fn new(
        source: Arc<dyn PageSource>,
        queue: Option<Arc<LinkQueue>>,
        recovery: Arc<RecoveryDir>,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            source,
            queue,
            recovery,
            shutdown,
        }
    }

    /// Fetches everything `settings` describes
    ///
    /// Without a time range this is a single page request. Otherwise the
    /// range is segmented and fetched concurrently; a fatal error in any
    /// segment aborts the rest.
    pub async fn run(&self, settings: &FetchSettings) -> Result<MergedResult> {
        match settings.time_range() {
            Some(range) => self.run_segments(settings, range).await,
            None => self.run_single(settings).await,
        }
    }

    async fn run_single(&self, settings: &FetchSettings) -> Result<MergedResult> {
        tracing::info!("No time range given, fetching a single page");

        let fetched = tokio::select! {
            fetched = fetch_once(self.source.as_ref(), settings, self.queue.as_deref()) => Some(fetched),
            _ = self.shutdown.cancelled() => None,
        };

        match fetched {
            Some(Ok(records)) => Ok(MergedResult {
                records,
                segments: 1,
                partial_segments: 0,
                pages: 1,
            }),
            Some(Err(e)) if e.is_retries_exhausted() => {
                tracing::error!("Single page fetch gave up: {}", e);
                Ok(MergedResult {
                    segments: 1,
                    partial_segments: 1,
                    ..MergedResult::default()
                })
            }
            Some(Err(e)) => Err(e),
            None => Ok(MergedResult {
                segments: 1,
                partial_segments: 1,
                ..MergedResult::default()
            }),
        }
    }

    async fn run_segments(
        &self,
        settings: &FetchSettings,
        (after, before): (i64, i64),
    ) -> Result<MergedResult> {
        let segments = split_range(after, before, settings.workers);
        tracing::info!(
            "Fetching [{}, {}] with {} workers",
            after,
            before,
            segments.len()
        );

        let mut set = JoinSet::new();
        for (index, range) in segments.iter().copied().enumerate() {
            let file = self.recovery.create_file(&format!("segment-{}", index))?;
            let source = Arc::clone(&self.source);
            let queue = self.queue.clone();
            let shutdown = Arc::clone(&self.shutdown);
            // each worker moves its own cursor
            let worker_settings = settings.clone();

            set.spawn(async move {
                let ctx = WindowContext {
                    source: source.as_ref(),
                    queue: queue.as_deref(),
                    shutdown: &shutdown,
                };
                fetch_time_window(ctx, worker_settings, index, range, file).await
            });
        }

        let mut results: Vec<SegmentResult> = Vec::with_capacity(segments.len());
        while let Some(joined) = set.join_next().await {
            match joined.map_err(HarvestError::from).and_then(|r| r) {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!("Segment failed, cancelling remaining workers: {}", e);
                    set.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(merge_segments(results))
    }
}

/// Concatenates segment results newest first
pub fn merge_segments(mut results: Vec<SegmentResult>) -> MergedResult {
    results.sort_by_key(|result| result.index);
    results.reverse();

    let mut merged = MergedResult {
        segments: results.len(),
        ..MergedResult::default()
    };
    for result in results {
        if !result.complete {
            merged.partial_segments += 1;
        }
        merged.pages += result.pages;
        merged.records.extend(result.records);
    }
    merged
}
