//! Time-interval search over derived item spans.
//!
//! Every cached row with a time anchor gets a derived `[start, end]` span;
//! items with an unbounded recurrence get an open-ended span. The index
//! answers "which items overlap this window" so a time-bounded query can
//! skip rows that cannot possibly match, instead of evaluating the full
//! expression against every stored item.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use pim_data_rs::ComponentKey;

/// The derived time span of one cached item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Span start.
    pub start: DateTime<Utc>,

    /// Span end; `None` marks an open-ended span (no defined end).
    pub end: Option<DateTime<Utc>>,
}

impl Span {
    /// Creates a closed span.
    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Creates an open-ended span.
    pub fn open_ended(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    /// Standard closed-interval overlap:
    /// `!(span.end < window_start || window_end < span.start)`.
    /// An open-ended span overlaps every window ending at or after its
    /// start.
    pub fn overlaps(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> bool {
        let ends_before_window = self.end.is_some_and(|end| end < window_start);
        !(ends_before_window || window_end < self.start)
    }
}

/// Index of item spans answering window-overlap queries.
///
/// Entries are kept sorted by span start, so a query scans only entries
/// starting at or before the window end and filters the rest by span end.
/// The result set is exactly what a naive per-item overlap test over the
/// full store would produce.
#[derive(Debug, Default)]
pub struct IntervalIndex {
    /// Spans ordered by `(start, key)`, mapping to the span end.
    by_start: BTreeMap<(DateTime<Utc>, ComponentKey), Option<DateTime<Utc>>>,

    /// Reverse lookup so replacement and removal find the sorted entry.
    starts: HashMap<ComponentKey, DateTime<Utc>>,
}

impl IntervalIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the span for a key.
    pub fn insert(&mut self, key: ComponentKey, span: Span) {
        self.remove(&key);
        self.starts.insert(key.clone(), span.start);
        self.by_start.insert((span.start, key), span.end);
    }

    /// Removes the span for a key, if present.
    pub fn remove(&mut self, key: &ComponentKey) {
        if let Some(start) = self.starts.remove(key) {
            self.by_start.remove(&(start, key.clone()));
        }
    }

    /// Returns true if the index holds a span for the key.
    pub fn contains(&self, key: &ComponentKey) -> bool {
        self.starts.contains_key(key)
    }

    /// Number of indexed spans.
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    /// Returns true if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Returns every key whose span overlaps `[window_start, window_end]`.
    ///
    /// Keys are returned in `(span start, key)` order. Entries starting
    /// after the window end cannot overlap, so the scan stops there.
    pub fn overlapping(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<ComponentKey> {
        self.by_start
            .iter()
            .take_while(|((start, _), _)| *start <= window_end)
            .filter(|(_, end)| !end.is_some_and(|end| end < window_start))
            .map(|((_, key), _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, day, hour, 0, 0).unwrap()
    }

    fn key(uid: &str) -> ComponentKey {
        ComponentKey::new(uid, None)
    }

    #[test]
    fn test_span_overlap_rule() {
        let span = Span::closed(utc(10, 0), utc(12, 0));

        assert!(span.overlaps(utc(9, 0), utc(10, 0))); // touches the start
        assert!(span.overlaps(utc(12, 0), utc(13, 0))); // touches the end
        assert!(span.overlaps(utc(11, 0), utc(11, 12))); // inside
        assert!(span.overlaps(utc(1, 0), utc(20, 0))); // covers
        assert!(!span.overlaps(utc(1, 0), utc(9, 0))); // before
        assert!(!span.overlaps(utc(13, 0), utc(20, 0))); // after
    }

    #[test]
    fn test_open_ended_span_overlap() {
        let span = Span::open_ended(utc(10, 0));

        assert!(span.overlaps(utc(20, 0), utc(25, 0)));
        assert!(span.overlaps(utc(1, 0), utc(10, 0)));
        assert!(!span.overlaps(utc(1, 0), utc(9, 0)));
    }

    #[test]
    fn test_overlapping_returns_matching_keys() {
        let mut index = IntervalIndex::new();
        index.insert(key("early"), Span::closed(utc(1, 0), utc(2, 0)));
        index.insert(key("mid"), Span::closed(utc(10, 0), utc(12, 0)));
        index.insert(key("open"), Span::open_ended(utc(5, 0)));
        index.insert(key("late"), Span::closed(utc(20, 0), utc(22, 0)));

        let hits = index.overlapping(utc(9, 0), utc(13, 0));
        assert_eq!(hits, vec![key("open"), key("mid")]);

        let hits = index.overlapping(utc(25, 0), utc(30, 0));
        assert_eq!(hits, vec![key("open")]);

        // A window preceding all data hits nothing.
        let hits = index.overlapping(utc(1, 0) - chrono::Duration::days(30), utc(1, 0) - chrono::Duration::days(29));
        assert!(hits.is_empty());
    }

    #[test]
    fn test_insert_replaces_existing_span() {
        let mut index = IntervalIndex::new();
        index.insert(key("a"), Span::closed(utc(1, 0), utc(2, 0)));
        index.insert(key("a"), Span::closed(utc(20, 0), utc(21, 0)));

        assert_eq!(index.len(), 1);
        assert!(index.overlapping(utc(1, 0), utc(2, 0)).is_empty());
        assert_eq!(index.overlapping(utc(20, 0), utc(21, 0)), vec![key("a")]);
    }

    #[test]
    fn test_remove() {
        let mut index = IntervalIndex::new();
        index.insert(key("a"), Span::closed(utc(1, 0), utc(2, 0)));
        assert!(index.contains(&key("a")));

        index.remove(&key("a"));
        assert!(!index.contains(&key("a")));
        assert!(index.is_empty());
        assert!(index.overlapping(utc(1, 0), utc(2, 0)).is_empty());
    }
}
