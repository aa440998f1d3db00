//! Integration tests for the harvester
//!
//! These tests run full harvests against a wiremock fake of the archive
//! provider that serves a fixed dataset newest first, honouring `after`
//! (inclusive), `before` (exclusive) and a fixed page size.

use arctic_harvest::config::{build_settings, load_config_with_hash};
use arctic_harvest::crawler::{harvester_from_config, ApiClient, RateBudget};
use arctic_harvest::output::open_sink;
use arctic_harvest::record::COMMENTS_FIELD;
use arctic_harvest::{DuplicatePolicy, Endpoint, FetchSettings, HarvestError, Harvester};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const PAGE_SIZE: usize = 7;

/// Serves `posts` (sorted newest first) filtered by the request's time bounds
struct FakeArchive {
    posts: Vec<Value>,
}

impl FakeArchive {
    /// One post per second in `[from, to)`
    fn new(from: i64, to: i64) -> Self {
        let posts = (from..to)
            .rev()
            .map(|t| {
                json!({
                    "id": format!("p{}", t),
                    "created_utc": t,
                    "author": "someone",
                    "title": format!("post {}", t),
                    "selftext": ""
                })
            })
            .collect();
        Self { posts }
    }
}

impl Respond for FakeArchive {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let params: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let bound = |key: &str| params.get(key).and_then(|v| v.parse::<i64>().ok());
        let after = bound("after").unwrap_or(i64::MIN);
        let before = bound("before").unwrap_or(i64::MAX);

        let page: Vec<Value> = self
            .posts
            .iter()
            .filter(|post| {
                let t = post["created_utc"].as_i64().unwrap_or_default();
                t >= after && t < before
            })
            .take(PAGE_SIZE)
            .cloned()
            .collect();

        ResponseTemplate::new(200)
            .set_body_json(json!({ "data": page }))
            .insert_header("X-RateLimit-Remaining", "500")
            .insert_header("X-RateLimit-Reset", "1")
    }
}

/// Serves a one-comment tree, wrapped the way the tree endpoint does it
struct FakeTrees;

impl Respond for FakeTrees {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let link_id = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "link_id")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"kind": "t1", "data": {"id": format!("c-{}", link_id), "link_id": link_id, "author": "x", "body": "nice"}}
            ]
        }))
    }
}

fn test_settings(after: Option<i64>, before: Option<i64>) -> FetchSettings {
    let mut settings = FetchSettings::new(Endpoint::Posts);
    settings.after = after;
    settings.before = before;
    settings.workers = 4;
    settings.comment_workers = 3;
    settings.interval = Duration::ZERO;
    settings.max_retries = 3;
    settings.retry_min_delay = Duration::ZERO;
    settings.retry_max_delay = Duration::from_millis(10);
    settings
}

fn test_harvester(server: &MockServer, settings: FetchSettings, dir: &Path) -> Harvester {
    let budget = Arc::new(RateBudget::new(1, Duration::ZERO, Duration::from_secs(5)));
    let client = ApiClient::new(reqwest::Client::new(), &server.uri(), budget)
        .unwrap()
        .with_cooldown(Duration::from_millis(50));
    Harvester::new(Arc::new(client), settings).with_recovery_parent(dir)
}

async fn mount_archive(server: &MockServer, from: i64, to: i64) {
    Mock::given(method("GET"))
        .and(path("/posts/search"))
        .respond_with(FakeArchive::new(from, to))
        .mount(server)
        .await;
}

fn created_times(outcome: &arctic_harvest::HarvestOutcome) -> Vec<i64> {
    outcome
        .records
        .iter()
        .map(|(_, record)| record["created_utc"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_single_page_without_time_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/search"))
        .and(query_param("subreddit", "rust"))
        .respond_with(FakeArchive::new(1000, 1100))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(None, None);
    settings
        .filters
        .insert("subreddit".to_string(), "rust".to_string());

    let outcome = test_harvester(&server, settings, dir.path())
        .run()
        .await
        .unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.records.len(), PAGE_SIZE);
    assert_eq!(outcome.stats.segments, 1);
    assert_eq!(created_times(&outcome)[0], 1099);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_segmented_harvest_is_complete_and_newest_first() {
    let server = MockServer::start().await;
    mount_archive(&server, 1000, 1100).await;

    let dir = tempfile::tempdir().unwrap();
    let outcome = test_harvester(&server, test_settings(Some(1000), Some(1100)), dir.path())
        .run()
        .await
        .unwrap();

    assert!(outcome.complete);
    assert!(outcome.recovery_dir.is_none());
    assert_eq!(outcome.stats.segments, 4);
    assert_eq!(outcome.records.len(), 100);

    let times = created_times(&outcome);
    let expected: Vec<i64> = (1000..1100).rev().collect();
    assert_eq!(times, expected);

    // recovery directory removed after a clean finish
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_rate_limit_pauses_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("X-RateLimit-Reset", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_archive(&server, 1000, 1005).await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(Some(1000), Some(1005));
    settings.workers = 1;

    let started = Instant::now();
    let outcome = test_harvester(&server, settings, dir.path())
        .run()
        .await
        .unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.records.len(), 5);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_unprocessable_responses_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/search"))
        .respond_with(ResponseTemplate::new(422).set_body_string("try again"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_archive(&server, 1000, 1010).await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(Some(1000), Some(1010));
    settings.workers = 1;

    let outcome = test_harvester(&server, settings, dir.path())
        .run()
        .await
        .unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.records.len(), 10);
}

#[tokio::test]
async fn test_missing_data_envelope_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "bad query"})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let result = test_harvester(&server, test_settings(Some(1000), Some(1100)), dir.path())
        .run()
        .await;

    assert!(matches!(result, Err(HarvestError::MalformedResponse { .. })));
    // recovery directory left behind for inspection
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_keep_partial_results_and_recovery_dir() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/search"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(Some(1000), Some(1100));
    settings.workers = 2;
    settings.max_retries = 2;

    let outcome = test_harvester(&server, settings, dir.path())
        .run()
        .await
        .unwrap();

    assert!(!outcome.complete);
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.stats.partial_segments, 2);

    let kept = outcome.recovery_dir.expect("recovery dir is kept");
    assert!(kept.join("segment-0.jsonl").exists());
    assert!(kept.join("segment-1.jsonl").exists());
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_comment_fanout_attaches_trees() {
    let server = MockServer::start().await;
    mount_archive(&server, 1000, 1020).await;
    Mock::given(method("GET"))
        .and(path("/comments/tree"))
        .and(query_param("limit", "25000"))
        .respond_with(FakeTrees)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(Some(1000), Some(1020));
    settings.fetch_comments = true;
    // small queue forces producers to wait on consumers
    settings.queue_capacity = 2;

    let outcome = test_harvester(&server, settings, dir.path())
        .run()
        .await
        .unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.records.len(), 20);
    assert_eq!(outcome.stats.comment_trees, 20);
    assert_eq!(outcome.stats.parents_with_comments, 20);
    for (id, record) in outcome.records.iter() {
        let comments = record[COMMENTS_FIELD].as_array().unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0]["id"], json!(format!("c-{}", id)));
    }
}

#[tokio::test]
async fn test_duplicate_policy_applies_across_segments() {
    let server = MockServer::start().await;

    // every page repeats its newest record with an edited copy
    struct EditingArchive(FakeArchive);

    impl Respond for EditingArchive {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let params: HashMap<String, String> =
                request.url.query_pairs().into_owned().collect();
            let after: i64 = params["after"].parse().unwrap();
            let before: i64 = params["before"].parse().unwrap();
            let mut page: Vec<Value> = self
                .0
                .posts
                .iter()
                .filter(|p| {
                    let t = p["created_utc"].as_i64().unwrap();
                    t >= after && t < before
                })
                .take(PAGE_SIZE)
                .cloned()
                .collect();
            if let Some(first) = page.first().cloned() {
                let mut removed = first;
                removed["author"] = json!("[deleted]");
                removed["selftext"] = json!("[removed]");
                page.insert(1, removed);
            }
            ResponseTemplate::new(200).set_body_json(json!({ "data": page }))
        }
    }

    Mock::given(method("GET"))
        .and(path("/posts/search"))
        .respond_with(EditingArchive(FakeArchive::new(1000, 1030)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(Some(1000), Some(1030));
    settings.duplicate_policy = DuplicatePolicy::KeepOriginal;

    let outcome = test_harvester(&server, settings, dir.path())
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.records.len(), 30);
    assert!(outcome.stats.duplicate_groups > 0);
    assert_eq!(outcome.stats.ambiguous, 0);
    for (_, record) in outcome.records.iter() {
        assert_eq!(record["author"], json!("someone"));
    }
}

#[tokio::test]
async fn test_config_file_to_sqlite_sink() {
    let server = MockServer::start().await;
    mount_archive(&server, 1000, 1010).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("out.db");
    let config_path = dir.path().join("harvest.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[request]
endpoint = "posts"
after = 1000
before = 1010

[request.filters]
subreddit = "rust"

[engine]
workers = 2
interval-ms = 0
retry-min-delay-ms = 0
retry-max-delay-ms = 10

[provider]
base-url = "{}"

[output]
path = "{}"
format = "sqlite"
recovery-dir = "{}"
"#,
            server.uri(),
            db_path.display(),
            dir.path().display()
        ),
    )
    .unwrap();

    let (config, hash) = load_config_with_hash(&config_path).unwrap();
    let settings = build_settings(&config).unwrap();
    let harvester = harvester_from_config(&config, settings).unwrap();

    let outcome = harvester.run().await.unwrap();
    assert!(outcome.complete);
    assert_eq!(outcome.records.len(), 10);

    let mut sink = open_sink(&config.output, &hash, Endpoint::Posts).unwrap();
    sink.save(&outcome).unwrap();
    assert!(db_path.exists());

    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.url.query_pairs().any(|(k, v)| k == "subreddit" && v == "rust")));
}
