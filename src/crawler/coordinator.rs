//! Harvest coordinator - top-level fetch orchestration
//!
//! This module ties the engine together for one query:
//! - Creating the recovery directory
//! - Starting the comment fanout alongside parent retrieval
//! - Running the segmented (or single page) parent fetch
//! - Draining the fanout queue and terminating its consumers
//! - Deduplicating, attaching comment trees and collecting statistics

use crate::config::FetchSettings;
use crate::crawler::fanout::{CommentFanout, FanoutResult, LinkQueue};
use crate::crawler::fetcher::PageSource;
use crate::crawler::segment::SegmentOrchestrator;
use crate::output::HarvestStats;
use crate::record::{attach_comments, index_records_with_report, RecordIndex};
use crate::recovery::RecoveryDir;
use crate::shutdown::{SharedShutdown, Shutdown};
use crate::{HarvestError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Result of one harvest
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    /// Deduplicated records keyed by id, newest first
    pub records: RecordIndex,

    /// False when any segment or comment worker stopped early
    pub complete: bool,

    /// Recovery directory left on disk for partial harvests
    pub recovery_dir: Option<PathBuf>,

    pub stats: HarvestStats,
}

/// Runs one query end to end
///
/// Every harvester owns its page source, and with it one HTTP client and
/// one rate budget, so unrelated harvests never share a budget.
pub struct Harvester {
    source: Arc<dyn PageSource>,
    settings: FetchSettings,
    recovery_parent: PathBuf,
    shutdown: SharedShutdown,
}

impl Harvester {
    /// Creates a harvester writing recovery files under the current directory
    ///
    /// # Arguments
    ///
    /// * `source` - Where pages come from, usually an [`ApiClient`](crate::crawler::ApiClient)
    /// * `settings` - Validated fetch settings
    pub fn new(source: Arc<dyn PageSource>, settings: FetchSettings) -> Self {
        Self {
            source,
            settings,
            recovery_parent: PathBuf::from("."),
            shutdown: Shutdown::shared(),
        }
    }

    /// Sets the directory recovery artifacts are created in
    pub fn with_recovery_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.recovery_parent = parent.into();
        self
    }

    /// Uses an externally owned shutdown signal
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle for requesting cancellation of a running harvest
    pub fn shutdown_handle(&self) -> SharedShutdown {
        Arc::clone(&self.shutdown)
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Runs the harvest
    ///
    /// # Returns
    ///
    /// * `Ok(HarvestOutcome)` - Complete or partial results; partial results
    ///   keep their recovery directory on disk
    /// * `Err(HarvestError)` - A fatal error aborted the harvest
    pub async fn run(&self) -> Result<HarvestOutcome> {
        let started = Instant::now();
        let settings = &self.settings;

        let recovery = Arc::new(RecoveryDir::create(
            &self.recovery_parent,
            &settings.fingerprint(),
        )?);
        tracing::info!(
            "Harvesting {} (recovery files in {})",
            settings.endpoint,
            recovery.path().display()
        );

        let queue = settings
            .fetch_comments
            .then(|| Arc::new(LinkQueue::new(settings.queue_capacity)));

        let mut fanout = queue.as_ref().map(|queue| {
            let fanout = CommentFanout::new(
                Arc::clone(&self.source),
                settings.clone(),
                Arc::clone(queue),
                Arc::clone(&recovery),
                Arc::clone(&self.shutdown),
            );
            tokio::spawn(fanout.run())
        });

        let orchestrator = SegmentOrchestrator::new(
            Arc::clone(&self.source),
            queue.clone(),
            Arc::clone(&recovery),
            Arc::clone(&self.shutdown),
        );

        // consumers failing must stop the producers, which would otherwise
        // block on a full queue
        let parents = orchestrator.run(settings);
        tokio::pin!(parents);
        let mut fanout_early = None;
        let merged = match fanout.as_mut() {
            Some(handle) => tokio::select! {
                merged = &mut parents => merged,
                joined = handle => match joined.map_err(HarvestError::from).and_then(|r| r) {
                    Ok(result) => {
                        fanout_early = Some(result);
                        (&mut parents).await
                    }
                    Err(e) => {
                        tracing::error!(
                            "Comment fanout failed, stopping parent retrieval. Recovery files kept in {}",
                            recovery.path().display()
                        );
                        return Err(e);
                    }
                },
            },
            None => (&mut parents).await,
        };

        let merged = match merged {
            Ok(merged) => merged,
            Err(e) => {
                if let Some(handle) = fanout {
                    handle.abort();
                }
                tracing::error!(
                    "Harvest failed, recovery files kept in {}",
                    recovery.path().display()
                );
                return Err(e);
            }
        };

        let fanout = match (queue, fanout, fanout_early) {
            (_, _, Some(result)) => Some(result),
            (Some(queue), Some(handle), None) => Some(self.finish_fanout(&queue, handle).await?),
            _ => None,
        };

        let (mut records, report) =
            index_records_with_report(&merged.records, settings.duplicate_policy);

        let mut stats = HarvestStats {
            segments: merged.segments,
            partial_segments: merged.partial_segments,
            pages: merged.pages,
            records_fetched: merged.records.len(),
            duplicate_groups: report.duplicate_groups,
            removed: report.removed,
            ambiguous: report.ambiguous,
            missing_id: report.missing_id,
            ..HarvestStats::default()
        };

        let mut complete = merged.is_complete() && !self.shutdown.is_requested();
        if let Some(fanout) = fanout {
            stats.comment_trees = fanout.fetched;
            stats.comment_trees_skipped = fanout.skipped;
            stats.parents_with_comments = attach_comments(&mut records, fanout.trees);
            complete &= fanout.complete;
        }
        stats.unique_records = records.len();
        stats.elapsed = started.elapsed();

        let recovery_dir = if complete {
            release(recovery)?;
            None
        } else {
            tracing::warn!(
                "Harvest incomplete, recovery files kept in {}",
                recovery.path().display()
            );
            Some(recovery.path().to_path_buf())
        };

        tracing::info!(
            "Harvest finished: {} unique records from {} fetched in {:.1}s",
            stats.unique_records,
            stats.records_fetched,
            stats.elapsed.as_secs_f64()
        );

        Ok(HarvestOutcome {
            records,
            complete,
            recovery_dir,
            stats,
        })
    }

    /// Waits for queued ids to drain, then sends one sentinel per consumer
    async fn finish_fanout(
        &self,
        queue: &LinkQueue,
        mut handle: JoinHandle<Result<FanoutResult>>,
    ) -> Result<FanoutResult> {
        let finished = tokio::select! {
            _ = queue.join() => None,
            _ = self.shutdown.cancelled() => None,
            joined = &mut handle => Some(joined),
        };

        let joined = match finished {
            Some(joined) => joined,
            None => {
                if !self.shutdown.is_requested() {
                    tracing::debug!("Comment queue drained, stopping consumers");
                    for _ in 0..self.settings.comment_workers.max(1) {
                        tokio::select! {
                            _ = queue.push_done() => {}
                            _ = self.shutdown.cancelled() => break,
                        }
                    }
                }
                handle.await
            }
        };

        joined.map_err(HarvestError::from)?
    }
}

/// Removes the recovery directory after a complete harvest
fn release(recovery: Arc<RecoveryDir>) -> Result<()> {
    let dir = Arc::try_unwrap(recovery).unwrap_or_else(|shared| (*shared).clone());
    dir.cleanup()?;
    Ok(())
}
