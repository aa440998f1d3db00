use crate::record::Record;
use serde_json::Value;

/// Longest text that still counts as a deletion marker
const MAX_MARKER_LEN: usize = 100;

/// Heuristically decides whether a submission or comment was deleted or removed
///
/// A record counts as deleted when any of these hold:
/// - it carries a non-null `removed_by_category` or `removal_reason`
/// - its author is missing, empty, or bracket-wrapped (`[deleted]`)
/// - it is a comment (no `title`) with an empty body
/// - its text is a short bracketed marker mentioning "deleted" or "removed",
///   e.g. `[removed]` or `[Deleted By User]`
///
/// Known to misclassify some edits, so callers must tolerate groups where
/// every copy gets the same answer.
pub fn is_deleted(record: &Record) -> bool {
    if ["removed_by_category", "removal_reason"]
        .iter()
        .any(|field| matches!(record.get(*field), Some(v) if !v.is_null()))
    {
        return true;
    }

    match record.get("author") {
        Some(Value::String(author)) => {
            if author.is_empty() || (author.starts_with('[') && author.ends_with(']')) {
                return true;
            }
        }
        _ => return true,
    }

    let is_post = matches!(record.get("title"), Some(v) if !v.is_null());
    let text_field = if is_post { "selftext" } else { "body" };
    let text = record
        .get(text_field)
        .and_then(Value::as_str)
        .unwrap_or("");

    if text.is_empty() && !is_post {
        return true;
    }

    is_deletion_marker(text)
}

fn is_deletion_marker(text: &str) -> bool {
    if !(text.starts_with('[') && text.ends_with(']')) || text.contains('\n') {
        return false;
    }
    if text.chars().count() > MAX_MARKER_LEN {
        return false;
    }
    let lower = text.to_lowercase();
    lower.contains("deleted") || lower.contains("removed")
}
