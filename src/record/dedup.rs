//! Duplicate resolution
//!
//! Concurrent segments and overlapping page boundaries return the same record
//! more than once, and the provider may hold both an original and an edited or
//! deleted copy. Indexing collapses each id to one record under a
//! [`DuplicatePolicy`].

use crate::config::DuplicatePolicy;
use crate::record::{is_deleted, record_id, Record, RecordIndex};
use std::collections::HashMap;

/// What happened while indexing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupReport {
    /// Ids seen more than once
    pub duplicate_groups: usize,

    /// Ids dropped by the `remove` policy
    pub removed: usize,

    /// Groups where the deletion heuristic could not tell copies apart
    pub ambiguous: usize,

    /// Records skipped because they carried no usable id
    pub missing_id: usize,
}

/// Indexes records by primary id, resolving duplicates with `policy`
///
/// Pure function of its input: the same records and policy always produce the
/// same index, in first-seen order.
pub fn index_records(records: &[Record], policy: DuplicatePolicy) -> RecordIndex {
    index_records_with_report(records, policy).0
}

/// Like [`index_records`], also reporting duplicate statistics
pub fn index_records_with_report(
    records: &[Record],
    policy: DuplicatePolicy,
) -> (RecordIndex, DedupReport) {
    let mut report = DedupReport::default();
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Record>> = HashMap::new();

    for record in records {
        let Some(id) = record_id(record) else {
            report.missing_id += 1;
            continue;
        };
        let group = groups.entry(id.clone()).or_insert_with(|| {
            order.push(id);
            Vec::new()
        });
        group.push(record);
    }

    let mut index = RecordIndex::new();
    for id in order {
        let group = &groups[&id];
        if group.len() == 1 {
            index.insert(id, group[0].clone());
            continue;
        }

        report.duplicate_groups += 1;
        tracing::debug!("{} copies of {}, resolving with {}", group.len(), id, policy);

        match resolve(&id, group, policy, &mut report) {
            Some(winner) => index.insert(id, winner.clone()),
            None => report.removed += 1,
        }
    }

    if report.missing_id > 0 {
        tracing::warn!("Skipped {} records without an id", report.missing_id);
    }

    (index, report)
}

/// Picks the surviving copy of one duplicate group, or `None` to drop it
fn resolve<'a>(
    id: &str,
    group: &[&'a Record],
    policy: DuplicatePolicy,
    report: &mut DedupReport,
) -> Option<&'a Record> {
    match policy {
        DuplicatePolicy::KeepNewest => group.last().copied(),
        DuplicatePolicy::KeepOldest => group.first().copied(),
        DuplicatePolicy::Remove => None,
        DuplicatePolicy::KeepOriginal => prefer(id, group, false, report),
        DuplicatePolicy::KeepRemoved => prefer(id, group, true, report),
    }
}

/// Keeps the most recently seen copy whose deletion state matches `want_deleted`
///
/// When every copy classifies the same way the heuristic gives no signal and
/// the most recently seen copy wins.
fn prefer<'a>(
    id: &str,
    group: &[&'a Record],
    want_deleted: bool,
    report: &mut DedupReport,
) -> Option<&'a Record> {
    let matching = group
        .iter()
        .rev()
        .find(|record| is_deleted(record) == want_deleted);
    let has_other = group.iter().any(|record| is_deleted(record) != want_deleted);

    match matching {
        Some(record) if has_other => Some(*record),
        _ => {
            report.ambiguous += 1;
            tracing::warn!(
                "Deletion heuristic cannot separate the {} copies of {}, keeping the most recently seen",
                group.len(),
                id
            );
            group.last().copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_record;
    use serde_json::json;

    /// `[{id:x, order:1, deleted}, {id:x, order:2, not deleted}]`
    fn deleted_then_live() -> Vec<Record> {
        vec![
            test_record(json!({"id": "x", "order": 1, "author": "[deleted]", "body": "[deleted]"})),
            test_record(json!({"id": "x", "order": 2, "author": "alice", "body": "hello"})),
        ]
    }

    fn order_of(index: &RecordIndex, id: &str) -> Option<i64> {
        index.get(id).and_then(|r| r["order"].as_i64())
    }

    #[test]
    fn test_policy_table() {
        let records = deleted_then_live();

        let newest = index_records(&records, DuplicatePolicy::KeepNewest);
        assert_eq!(order_of(&newest, "x"), Some(2));

        let oldest = index_records(&records, DuplicatePolicy::KeepOldest);
        assert_eq!(order_of(&oldest, "x"), Some(1));

        let original = index_records(&records, DuplicatePolicy::KeepOriginal);
        assert_eq!(order_of(&original, "x"), Some(2));

        let removed = index_records(&records, DuplicatePolicy::KeepRemoved);
        assert_eq!(order_of(&removed, "x"), Some(1));

        let dropped = index_records(&records, DuplicatePolicy::Remove);
        assert!(!dropped.contains_key("x"));
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_indexing_is_idempotent() {
        let mut records = deleted_then_live();
        records.push(test_record(json!({"id": "y", "author": "bob", "body": "b"})));
        records.push(test_record(json!({"id": "x", "order": 3, "author": "carol", "body": "c"})));

        for policy in [
            DuplicatePolicy::KeepNewest,
            DuplicatePolicy::KeepOldest,
            DuplicatePolicy::Remove,
            DuplicatePolicy::KeepOriginal,
            DuplicatePolicy::KeepRemoved,
        ] {
            let first = index_records(&records, policy);
            let second = index_records(&records, policy);
            assert_eq!(first, second, "policy {} is not deterministic", policy);
        }
    }

    #[test]
    fn test_ambiguous_group_falls_back_to_latest() {
        let records = vec![
            test_record(json!({"id": "z", "order": 1, "author": "alice", "body": "v1"})),
            test_record(json!({"id": "z", "order": 2, "author": "alice", "body": "v2"})),
        ];

        let (index, report) = index_records_with_report(&records, DuplicatePolicy::KeepOriginal);
        assert_eq!(order_of(&index, "z"), Some(2));
        assert_eq!(report.ambiguous, 1);

        let (index, report) = index_records_with_report(&records, DuplicatePolicy::KeepRemoved);
        assert_eq!(order_of(&index, "z"), Some(2));
        assert_eq!(report.ambiguous, 1);
    }

    #[test]
    fn test_report_counts() {
        let mut records = deleted_then_live();
        records.push(test_record(json!({"body": "no id"})));
        records.push(test_record(json!({"id": "y", "author": "bob", "body": "b"})));

        let (index, report) = index_records_with_report(&records, DuplicatePolicy::Remove);
        assert_eq!(index.len(), 1);
        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.missing_id, 1);
    }

    #[test]
    fn test_first_seen_order_preserved() {
        let records = vec![
            test_record(json!({"id": "b", "author": "u", "body": "1"})),
            test_record(json!({"id": "a", "author": "u", "body": "2"})),
            test_record(json!({"id": "b", "author": "u", "body": "3"})),
        ];
        let index = index_records(&records, DuplicatePolicy::KeepNewest);
        let keys: Vec<&str> = index.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(index.get("b").unwrap()["body"], json!("3"));
    }
}
