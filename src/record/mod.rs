//! Schema-agnostic records and their indexing
//!
//! A record is an ordered JSON object exactly as the provider returned it.
//! The engine only reads two fields by name:
//! - `id`, the primary key
//! - `created_utc`, the pagination cursor for time-windowed fetches
//!
//! Everything else flows through untouched.

mod dedup;
mod deletion;

pub use dedup::{index_records, index_records_with_report, DedupReport};
pub use deletion::is_deleted;

use serde_json::Value;
use std::collections::HashMap;

/// One submission or comment
pub type Record = serde_json::Map<String, Value>;

/// Field name injected into parents when comment trees are fetched
pub const COMMENTS_FIELD: &str = "comments";

/// Returns the record's primary key
///
/// Numeric ids are accepted and rendered as strings.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Returns the record's creation time in epoch seconds
///
/// Providers send this as an integer, a float, or occasionally a numeric string.
pub fn created_utc(record: &Record) -> Option<i64> {
    match record.get("created_utc")? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64)),
        _ => None,
    }
}

/// Records keyed by primary id, iterated in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordIndex {
    order: Vec<String>,
    entries: HashMap<String, Record>,
}

impl RecordIndex {
    /// Creates an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record, keeping the key's original position
    pub fn insert(&mut self, id: String, record: Record) {
        if !self.entries.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.entries.insert(id, record);
    }

    /// Removes a record
    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let removed = self.entries.remove(id)?;
        self.order.retain(|key| key != id);
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.entries.get_mut(id)
    }

    pub fn contains_key(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in first-seen order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// `(id, record)` pairs in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|record| (id.as_str(), record)))
    }

    /// Converts the index into one JSON object keyed by id
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::with_capacity(self.len());
        for (id, record) in self.iter() {
            map.insert(id.to_string(), Value::Object(record.clone()));
        }
        Value::Object(map)
    }
}

/// Gives every parent a `comments` list and fills it from fetched trees
///
/// Trees are keyed by the parent id they were fetched for; trees whose
/// parent is not in the index are ignored. Returns the number of parents
/// that received at least one comment.
pub fn attach_comments(index: &mut RecordIndex, mut trees: HashMap<String, Vec<Record>>) -> usize {
    let ids: Vec<String> = index.keys().map(str::to_string).collect();
    let mut populated = 0;

    for id in ids {
        let comments = trees.remove(&id).unwrap_or_default();
        if !comments.is_empty() {
            populated += 1;
        }
        if let Some(parent) = index.get_mut(&id) {
            let values = comments.into_iter().map(Value::Object).collect();
            parent.insert(COMMENTS_FIELD.to_string(), Value::Array(values));
        }
    }

    if !trees.is_empty() {
        tracing::debug!(
            "{} comment trees had no matching parent and were dropped",
            trees.len()
        );
    }

    populated
}

#[cfg(test)]
pub(crate) fn test_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_accessor() {
        assert_eq!(
            record_id(&test_record(json!({"id": "abc"}))),
            Some("abc".to_string())
        );
        assert_eq!(
            record_id(&test_record(json!({"id": 17}))),
            Some("17".to_string())
        );
        assert_eq!(record_id(&test_record(json!({"id": ""}))), None);
        assert_eq!(record_id(&test_record(json!({"name": "x"}))), None);
    }

    #[test]
    fn test_created_utc_accessor() {
        assert_eq!(
            created_utc(&test_record(json!({"created_utc": 1700000000}))),
            Some(1_700_000_000)
        );
        assert_eq!(
            created_utc(&test_record(json!({"created_utc": 1700000000.7}))),
            Some(1_700_000_000)
        );
        assert_eq!(
            created_utc(&test_record(json!({"created_utc": "1700000000"}))),
            Some(1_700_000_000)
        );
        assert_eq!(created_utc(&test_record(json!({"created_utc": null}))), None);
    }

    #[test]
    fn test_index_keeps_first_seen_position() {
        let mut index = RecordIndex::new();
        index.insert("a".to_string(), test_record(json!({"id": "a", "v": 1})));
        index.insert("b".to_string(), test_record(json!({"id": "b"})));
        index.insert("a".to_string(), test_record(json!({"id": "a", "v": 2})));

        let keys: Vec<&str> = index.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(index.get("a").unwrap()["v"], json!(2));

        index.remove("a");
        assert_eq!(index.len(), 1);
        assert!(!index.contains_key("a"));
    }

    #[test]
    fn test_attach_comments() {
        let mut index = RecordIndex::new();
        index.insert("p1".to_string(), test_record(json!({"id": "p1"})));
        index.insert("p2".to_string(), test_record(json!({"id": "p2"})));

        let mut trees = HashMap::new();
        trees.insert(
            "p1".to_string(),
            vec![test_record(json!({"id": "c1", "body": "hi"}))],
        );
        trees.insert("orphan".to_string(), vec![test_record(json!({"id": "c9"}))]);

        let populated = attach_comments(&mut index, trees);
        assert_eq!(populated, 1);
        assert_eq!(index.get("p1").unwrap()[COMMENTS_FIELD][0]["id"], json!("c1"));
        assert_eq!(index.get("p2").unwrap()[COMMENTS_FIELD], json!([]));
    }
}
