//! Cursor pagination over one time window
//!
//! The provider returns results newest first, so `before` is the moving
//! cursor and `after` the fixed floor. Each page moves the cursor back to the
//! `created_utc` of its last record until the window is exhausted.

use crate::config::FetchSettings;
use crate::crawler::fanout::LinkQueue;
use crate::crawler::fetcher::{fetch_once, PageSource};
use crate::record::{created_utc, Record};
use crate::recovery::RecoveryFile;
use crate::shutdown::Shutdown;
use crate::{HarvestError, Result};

/// Shared collaborators of one paginating worker
#[derive(Clone, Copy)]
pub struct WindowContext<'a> {
    pub source: &'a dyn PageSource,

    /// Seeded with every fetched record id when comments are requested
    pub queue: Option<&'a LinkQueue>,

    pub shutdown: &'a Shutdown,
}

/// What one window produced
#[derive(Debug, Clone, Default)]
pub struct SegmentResult {
    /// Segment index, 0 being the oldest sub-range
    pub index: usize,

    /// Records in provider order (newest first)
    pub records: Vec<Record>,

    /// Pages fetched
    pub pages: usize,

    /// False when retries ran out or shutdown interrupted the window
    pub complete: bool,
}

/// Pages backward through `[after, before]` until no records remain
///
/// # Arguments
///
/// * `ctx` - Page source, optional fanout queue and shutdown signal
/// * `settings` - This worker's own copy; `before` is overwritten per page
/// * `index` - Segment index, for logging
/// * `(after, before)` - Window bounds in epoch seconds
/// * `file` - Recovery file receiving every page
///
/// # Returns
///
/// The accumulated records. Running out of retries or being cancelled
/// yields a partial result with the recovery file left on disk; only fatal
/// errors are returned as `Err`.
pub async fn fetch_time_window(
    ctx: WindowContext<'_>,
    mut settings: FetchSettings,
    index: usize,
    (after, before): (i64, i64),
    mut file: RecoveryFile,
) -> Result<SegmentResult> {
    settings.after = Some(after);

    let mut result = SegmentResult {
        index,
        ..SegmentResult::default()
    };
    let mut cursor = before;
    let mut complete = true;

    tracing::info!("Worker {} paging window [{}, {}]", index, after, before);

    while cursor > after {
        if ctx.shutdown.is_requested() {
            complete = false;
            break;
        }

        settings.before = Some(cursor);

        let fetched = tokio::select! {
            fetched = fetch_once(ctx.source, &settings, ctx.queue) => fetched,
            _ = ctx.shutdown.cancelled() => {
                tracing::warn!("Worker {} interrupted at cursor {}", index, cursor);
                complete = false;
                break;
            }
        };

        let page = match fetched {
            Ok(page) => page,
            Err(e) if e.is_retries_exhausted() => {
                tracing::error!(
                    "Worker {} gave up at cursor {}, keeping {} records: {}",
                    index,
                    cursor,
                    result.records.len(),
                    e
                );
                complete = false;
                break;
            }
            Err(e) => {
                file.retain();
                return Err(e);
            }
        };

        if page.is_empty() {
            break;
        }

        if let Err(e) = file.append_page(&page) {
            file.retain();
            return Err(e.into());
        }
        result.pages += 1;

        let next = match page.last().and_then(created_utc) {
            Some(next) => next,
            None => {
                file.retain();
                return Err(HarvestError::MalformedResponse {
                    url: settings.endpoint.path().to_string(),
                    message: "record without a numeric `created_utc`".to_string(),
                });
            }
        };
        result.records.extend(page);

        cursor = if next >= cursor {
            // a full page sharing one timestamp would repeat forever
            tracing::warn!(
                "Worker {} cursor stalled at {}, stepping back one second",
                index,
                cursor
            );
            cursor - 1
        } else {
            next
        };

        tracing::info!(
            "Worker {} progress: {:.2}% ({} records)",
            index,
            progress(after, before, cursor),
            result.records.len()
        );
    }

    result.complete = complete;
    if complete {
        file.discard()?;
        tracing::info!(
            "Worker {} finished window with {} records",
            index,
            result.records.len()
        );
    } else {
        file.retain();
    }

    Ok(result)
}

/// Share of `[after, before]` already covered when the cursor is at `cursor`
fn progress(after: i64, before: i64, cursor: i64) -> f64 {
    let span = (before - after) as f64;
    if span <= 0.0 {
        return 100.0;
    }
    (((before - cursor.max(after)) as f64 / span) * 100.0).clamp(0.0, 100.0)
}
