//! Comment-tree fanout
//!
//! Parent retrieval pushes post ids into a shared [`LinkQueue`] as pages
//! arrive. [`CommentFanout`] runs a fixed pool of consumers that drain it,
//! each fetching one whole comment tree per id, until every consumer has
//! popped a [`QueueItem::Done`].

use crate::config::FetchSettings;
use crate::crawler::fetcher::{fetch_once, PageSource};
use crate::record::Record;
use crate::recovery::RecoveryDir;
use crate::shutdown::SharedShutdown;
use crate::{HarvestError, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;

/// One entry of the fanout queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    /// Fetch the comment tree of this post id
    Fetch(String),

    /// No more work for the consumer that pops this
    Done,
}

/// Bounded multi-consumer queue of post ids with join semantics
///
/// Every popped item must be acknowledged with [`task_done`](LinkQueue::task_done);
/// [`join`](LinkQueue::join) resolves once everything pushed so far has been
/// acknowledged.
#[derive(Debug)]
pub struct LinkQueue {
    sender: mpsc::Sender<QueueItem>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<QueueItem>>,
    seen: Mutex<HashSet<String>>,
    pending: AtomicUsize,
    drained: Notify,
}

impl LinkQueue {
    /// Creates a queue holding at most `capacity` unconsumed items
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            seen: Mutex::new(HashSet::new()),
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Enqueues a post id, waiting while the queue is full
    ///
    /// Ids already pushed once are ignored; returns whether the id was new.
    pub async fn push(&self, id: String) -> bool {
        {
            let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
            if !seen.insert(id.clone()) {
                return false;
            }
        }
        self.send(QueueItem::Fetch(id)).await;
        true
    }

    /// Enqueues one termination sentinel
    pub async fn push_done(&self) {
        self.send(QueueItem::Done).await;
    }

    async fn send(&self, item: QueueItem) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        // the queue owns a receiver, so the channel cannot be closed
        if self.sender.send(item).await.is_err() {
            self.task_done();
        }
    }

    /// Takes the next item, waiting until one is available
    pub async fn pop(&self) -> Option<QueueItem> {
        self.receiver.lock().await.recv().await
    }

    /// Acknowledges one popped item
    pub fn task_done(&self) {
        let previous = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous <= 1 {
            self.drained.notify_waiters();
        }
    }

    /// Waits until every pushed item has been acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Pushed but not yet acknowledged items
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Distinct ids pushed so far
    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Comment trees collected by the fanout
#[derive(Debug, Default)]
pub struct FanoutResult {
    /// Comments keyed by the post id they were fetched for
    pub trees: HashMap<String, Vec<Record>>,

    /// Trees fetched successfully
    pub fetched: usize,

    /// Ids skipped after exhausting their retries
    pub skipped: usize,

    /// False when a consumer stopped early
    pub complete: bool,
}

/// Per-consumer accumulation
#[derive(Debug, Default)]
struct WorkerResult {
    trees: Vec<(String, Vec<Record>)>,
    skipped: usize,
    complete: bool,
}

/// Pool of comment-tree consumers draining one [`LinkQueue`]
pub struct CommentFanout {
    source: Arc<dyn PageSource>,
    settings: FetchSettings,
    queue: Arc<LinkQueue>,
    recovery: Arc<RecoveryDir>,
    shutdown: SharedShutdown,
}

impl CommentFanout {
    pub fn new(
        source: Arc<dyn PageSource>,
        settings: FetchSettings,
        queue: Arc<LinkQueue>,
        recovery: Arc<RecoveryDir>,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            source,
            settings,
            queue,
            recovery,
            shutdown,
        }
    }

    /// Runs `settings.comment_workers` consumers until each pops a sentinel
    ///
    /// A fatal error from any consumer aborts the others.
    pub async fn run(self) -> Result<FanoutResult> {
        let workers = self.settings.comment_workers.max(1);
        tracing::info!("Starting {} comment workers", workers);

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let source = Arc::clone(&self.source);
            let settings = self.settings.clone();
            let queue = Arc::clone(&self.queue);
            let recovery = Arc::clone(&self.recovery);
            let shutdown = Arc::clone(&self.shutdown);
            set.spawn(async move {
                consume(worker, source, settings, queue, recovery, shutdown).await
            });
        }

        let mut result = FanoutResult {
            complete: true,
            ..FanoutResult::default()
        };

        while let Some(joined) = set.join_next().await {
            let worker = match joined.map_err(HarvestError::from).and_then(|r| r) {
                Ok(worker) => worker,
                Err(e) => {
                    set.abort_all();
                    return Err(e);
                }
            };
            result.fetched += worker.trees.len();
            result.skipped += worker.skipped;
            result.complete &= worker.complete;
            for (id, tree) in worker.trees {
                result.trees.insert(id, tree);
            }
        }

        tracing::info!(
            "Comment fanout finished: {} trees fetched, {} skipped",
            result.fetched,
            result.skipped
        );
        Ok(result)
    }
}

/// One consumer loop
async fn consume(
    worker: usize,
    source: Arc<dyn PageSource>,
    settings: FetchSettings,
    queue: Arc<LinkQueue>,
    recovery: Arc<RecoveryDir>,
    shutdown: SharedShutdown,
) -> Result<WorkerResult> {
    let mut file = recovery.create_file(&format!("comments-{}", worker))?;
    let mut result = WorkerResult::default();

    loop {
        if shutdown.is_requested() {
            break;
        }

        let item = tokio::select! {
            item = queue.pop() => item,
            _ = shutdown.cancelled() => break,
        };

        let id = match item {
            Some(QueueItem::Fetch(id)) => id,
            Some(QueueItem::Done) | None => {
                queue.task_done();
                result.complete = true;
                break;
            }
        };

        let tree_settings = settings.comment_tree(&id);
        let fetched = tokio::select! {
            fetched = fetch_once(source.as_ref(), &tree_settings, None) => fetched,
            _ = shutdown.cancelled() => {
                queue.task_done();
                break;
            }
        };

        match fetched {
            Ok(items) => {
                let comments: Vec<Record> = items.into_iter().map(unwrap_tree_item).collect();
                if let Err(e) = file.append_page(&comments) {
                    queue.task_done();
                    return Err(e.into());
                }
                tracing::debug!(
                    "Worker {} fetched {} comments for {}",
                    worker,
                    comments.len(),
                    id
                );
                result.trees.push((id, comments));
            }
            Err(e) if e.is_retries_exhausted() => {
                tracing::error!("Skipping comments for {}: {}", id, e);
                result.skipped += 1;
            }
            Err(e) => {
                queue.task_done();
                return Err(e);
            }
        }

        queue.task_done();
        tracing::info!("Remaining comment queue: {}", queue.pending());
    }

    if result.complete {
        file.discard()?;
    } else {
        tracing::warn!("Comment worker {} stopped before its sentinel", worker);
        file.retain();
    }
    Ok(result)
}

/// Tree endpoints wrap each comment as `{kind, data}`
fn unwrap_tree_item(mut item: Record) -> Record {
    match item.remove("data") {
        Some(Value::Object(data)) if item.contains_key("kind") => data,
        Some(other) => {
            item.insert("data".to_string(), other);
            item
        }
        None => item,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, PageQuery};
    use crate::crawler::fetcher::Page;
    use crate::crawler::retry::{Outcome, RetryReason};
    use crate::record::test_record;
    use crate::shutdown::Shutdown;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Serves a two-comment tree for every id except "bad", which always fails
    struct TreeSource;

    #[async_trait]
    impl PageSource for TreeSource {
        async fn fetch_page(&self, query: &PageQuery) -> Outcome<Page> {
            let link_id = query.params.get("link_id").cloned().unwrap_or_default();
            if link_id == "bad" {
                return Outcome::Retryable(RetryReason::Unprocessable);
            }
            Outcome::Success(vec![
                test_record(json!({"kind": "t1", "data": {"id": format!("{}-c1", link_id)}})),
                test_record(json!({"kind": "t1", "data": {"id": format!("{}-c2", link_id)}})),
            ])
        }
    }

    fn settings(workers: usize) -> FetchSettings {
        let mut settings = FetchSettings::new(Endpoint::Posts);
        settings.comment_workers = workers;
        settings.max_retries = 2;
        settings.retry_min_delay = Duration::ZERO;
        settings.retry_max_delay = Duration::from_millis(5);
        settings
    }

    fn fanout(workers: usize, queue: &Arc<LinkQueue>, dir: &TempDir) -> CommentFanout {
        let recovery = RecoveryDir::create(dir.path(), "test").unwrap();
        CommentFanout::new(
            Arc::new(TreeSource),
            settings(workers),
            Arc::clone(queue),
            Arc::new(recovery),
            Shutdown::shared(),
        )
    }

    #[tokio::test]
    async fn test_queue_suppresses_duplicates_and_joins() {
        let queue = LinkQueue::new(8);
        assert!(queue.push("a".to_string()).await);
        assert!(!queue.push("a".to_string()).await);
        assert!(queue.push("b".to_string()).await);
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.seen_count(), 2);

        assert_eq!(queue.pop().await, Some(QueueItem::Fetch("a".to_string())));
        queue.task_done();
        assert_eq!(queue.pop().await, Some(QueueItem::Fetch("b".to_string())));
        queue.task_done();

        tokio::time::timeout(Duration::from_secs(1), queue.join())
            .await
            .expect("queue should be drained");
    }

    #[tokio::test]
    async fn test_sentinels_terminate_workers_with_empty_parent_set() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(LinkQueue::new(16));
        // two sentinels per worker slot, no parents at all
        for _ in 0..6 {
            queue.push_done().await;
        }

        let result = tokio::time::timeout(Duration::from_secs(5), fanout(3, &queue, &dir).run())
            .await
            .expect("workers must not deadlock")
            .unwrap();

        assert!(result.complete);
        assert!(result.trees.is_empty());
        // surplus sentinels stay queued
        assert_eq!(queue.pending(), 3);
    }

    #[tokio::test]
    async fn test_trees_are_unwrapped_and_failures_skipped() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(LinkQueue::new(16));
        for id in ["p1", "bad", "p2"] {
            queue.push(id.to_string()).await;
        }

        let handle = tokio::spawn(fanout(2, &queue, &dir).run());
        queue.join().await;
        for _ in 0..2 {
            queue.push_done().await;
        }

        let result = handle.await.unwrap().unwrap();
        assert!(result.complete);
        assert_eq!(result.fetched, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.trees["p1"][0]["id"], json!("p1-c1"));
        assert_eq!(result.trees["p2"].len(), 2);
        assert!(!result.trees.contains_key("bad"));
    }

    #[test]
    fn test_unwrap_tree_item() {
        let wrapped = test_record(json!({"kind": "t1", "data": {"id": "c1"}}));
        assert_eq!(unwrap_tree_item(wrapped)["id"], json!("c1"));

        let plain = test_record(json!({"id": "c2", "data": {"x": 1}}));
        let kept = unwrap_tree_item(plain);
        assert_eq!(kept["id"], json!("c2"));
        assert_eq!(kept["data"], json!({"x": 1}));
    }
}
