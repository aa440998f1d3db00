//! Harvest statistics
//!
//! Counters collected while a harvest runs, printed by the CLI at the end.

use std::time::Duration;

/// Harvest statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestStats {
    /// Time segments launched (1 for a single page request)
    pub segments: usize,

    /// Segments that stopped before covering their window
    pub partial_segments: usize,

    /// Pages fetched across all segments
    pub pages: usize,

    /// Records received, duplicates included
    pub records_fetched: usize,

    /// Records left after duplicate resolution
    pub unique_records: usize,

    pub duplicate_groups: usize,

    /// Ids dropped by the `remove` policy
    pub removed: usize,

    /// Duplicate groups the deletion heuristic could not separate
    pub ambiguous: usize,

    /// Records skipped for lacking an id
    pub missing_id: usize,

    pub comment_trees: usize,
    pub comment_trees_skipped: usize,
    pub parents_with_comments: usize,

    pub elapsed: Duration,
}

impl HarvestStats {
    /// Share of fetched records that were duplicates, in percent
    pub fn duplicate_rate(&self) -> f64 {
        if self.records_fetched == 0 {
            return 0.0;
        }
        let dropped = self.records_fetched.saturating_sub(self.unique_records);
        (dropped as f64 / self.records_fetched as f64) * 100.0
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
/// * `complete` - Whether the harvest finished every unit of work
pub fn print_statistics(stats: &HarvestStats, complete: bool) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!(
        "  Status: {}",
        if complete { "complete" } else { "partial" }
    );
    println!("  Elapsed: {:.1}s", stats.elapsed.as_secs_f64());
    println!(
        "  Segments: {} ({} partial)",
        stats.segments, stats.partial_segments
    );
    println!("  Pages fetched: {}", stats.pages);
    println!();

    println!("Records:");
    println!("  Fetched: {}", stats.records_fetched);
    println!("  Unique: {}", stats.unique_records);
    println!(
        "  Duplicate groups: {} ({:.1}% of fetched records)",
        stats.duplicate_groups,
        stats.duplicate_rate()
    );
    if stats.removed > 0 {
        println!("  Removed by policy: {}", stats.removed);
    }
    if stats.ambiguous > 0 {
        println!("  Ambiguous resolutions: {}", stats.ambiguous);
    }
    if stats.missing_id > 0 {
        println!("  Skipped without id: {}", stats.missing_id);
    }

    if stats.comment_trees > 0 || stats.comment_trees_skipped > 0 {
        println!();
        println!("Comments:");
        println!("  Trees fetched: {}", stats.comment_trees);
        println!("  Trees skipped: {}", stats.comment_trees_skipped);
        println!("  Posts with comments: {}", stats.parents_with_comments);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rate() {
        let stats = HarvestStats {
            records_fetched: 200,
            unique_records: 150,
            ..HarvestStats::default()
        };
        assert_eq!(stats.duplicate_rate(), 25.0);
        assert_eq!(HarvestStats::default().duplicate_rate(), 0.0);
    }
}
