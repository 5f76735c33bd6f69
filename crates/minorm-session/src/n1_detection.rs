//! N+1 fetch detection.
//!
//! Loading N owners and then fetching a lazy relationship on each issues
//! N+1 reads where a join would issue one. The session counts fetches per
//! `(model, relationship)` and warns once a count reaches the threshold.
//!
//! ```ignore
//! // Warns on the 10th iteration with the default threshold:
//! for course in &courses {
//!     session.fetch_many(&cx, course, &Course::REVIEWS).await?;
//! }
//!
//! // One round trip instead:
//! let mut query = CriteriaQuery::<Course>::from();
//! let reviews = query.join::<Review>("reviews", JoinKind::LeftOuter);
//! session.tuples(&cx, &query, &reviews).await?;
//! ```

use std::collections::HashMap;

/// Counts lazy fetches per relationship.
#[derive(Debug)]
pub struct FetchTracker {
    counts: HashMap<(&'static str, &'static str), usize>,
    threshold: Option<usize>,
}

/// Fetch statistics for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Total number of lazy fetches that hit storage.
    pub total_fetches: usize,
    /// Number of distinct relationships fetched.
    pub relationships_fetched: usize,
    /// Number of relationships that reached the threshold.
    pub potential_n1: usize,
}

impl FetchTracker {
    /// Tracker warning at `threshold` fetches; `None` only counts.
    pub fn new(threshold: Option<usize>) -> Self {
        Self {
            counts: HashMap::new(),
            threshold,
        }
    }

    /// The warning threshold.
    pub fn threshold(&self) -> Option<usize> {
        self.threshold
    }

    /// Record one fetch of `model.relationship`.
    pub fn record(&mut self, model: &'static str, relationship: &'static str) {
        let count = self.counts.entry((model, relationship)).or_insert(0);
        *count += 1;

        if Some(*count) == self.threshold {
            tracing::warn!(
                target: "minorm::n1",
                model,
                relationship,
                fetches = *count,
                "N+1 fetch pattern detected; consider a join query for this relationship"
            );
        }
    }

    /// Fetches recorded for `model.relationship`.
    pub fn count_for(&self, model: &str, relationship: &str) -> usize {
        self.counts
            .iter()
            .find(|((m, r), _)| *m == model && *r == relationship)
            .map_or(0, |(_, c)| *c)
    }

    /// Summary statistics.
    pub fn stats(&self) -> FetchStats {
        FetchStats {
            total_fetches: self.counts.values().sum(),
            relationships_fetched: self.counts.len(),
            potential_n1: self.threshold.map_or(0, |t| {
                self.counts.values().filter(|c| **c >= t).count()
            }),
        }
    }

    /// Forget all counts.
    pub fn reset(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_relationship() {
        let mut tracker = FetchTracker::new(Some(10));
        tracker.record("course", "reviews");
        tracker.record("course", "reviews");
        tracker.record("course", "students");
        tracker.record("student", "passport");

        assert_eq!(tracker.count_for("course", "reviews"), 2);
        assert_eq!(tracker.count_for("course", "students"), 1);
        assert_eq!(tracker.count_for("review", "course"), 0);
    }

    #[test]
    fn test_stats() {
        let mut tracker = FetchTracker::new(Some(2));
        tracker.record("review", "course");
        tracker.record("review", "course");
        tracker.record("course", "reviews");

        assert_eq!(
            tracker.stats(),
            FetchStats {
                total_fetches: 3,
                relationships_fetched: 2,
                potential_n1: 1,
            }
        );
    }

    #[test]
    fn test_without_threshold_only_counts() {
        let mut tracker = FetchTracker::new(None);
        for _ in 0..50 {
            tracker.record("review", "course");
        }
        assert_eq!(tracker.stats().potential_n1, 0);
        assert_eq!(tracker.count_for("review", "course"), 50);

        tracker.reset();
        assert_eq!(tracker.stats(), FetchStats::default());
    }
}
