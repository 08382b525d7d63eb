//! Property tests for the interval range search.
//!
//! The index must return exactly the keys a naive per-item overlap test
//! over the full span set would, for any mix of closed and open-ended
//! spans and any query window.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pim_cache_rs::{IntervalIndex, Span};
use pim_data_rs::ComponentKey;

/// Small deterministic PRNG (xorshift64*), so failures reproduce.
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

fn naive_overlap(spans: &[(ComponentKey, Span)], start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<ComponentKey> {
    let mut keys: Vec<ComponentKey> = spans
        .iter()
        .filter(|(_, span)| span.overlaps(start, end))
        .map(|(key, _)| key.clone())
        .collect();
    keys.sort();
    keys
}

fn random_spans(rng: &mut XorShift, count: usize) -> Vec<(ComponentKey, Span)> {
    (0..count)
        .map(|i| {
            let key = ComponentKey::new(format!("item-{i:03}"), None);
            let start = base() + Duration::hours(rng.below(5000) as i64);
            // Every fifth span is open-ended.
            let span = if i % 5 == 0 {
                Span::open_ended(start)
            } else {
                Span::closed(start, start + Duration::hours(rng.below(200) as i64))
            };
            (key, span)
        })
        .collect()
}

#[test]
fn test_index_matches_naive_overlap_for_random_windows() {
    let mut rng = XorShift::new(0x5eed_1234_5678_9abc);
    let spans = random_spans(&mut rng, 140);

    let mut index = IntervalIndex::new();
    for (key, span) in &spans {
        index.insert(key.clone(), *span);
    }
    assert_eq!(index.len(), spans.len());

    for _ in 0..600 {
        // Window starts range from well before all data to well after it.
        let offset = rng.below(8000) as i64 - 1500;
        let start = base() + Duration::hours(offset);
        let end = start + Duration::hours(rng.below(300) as i64);

        let mut found = index.overlapping(start, end);
        found.sort();
        assert_eq!(
            found,
            naive_overlap(&spans, start, end),
            "window [{start}, {end}]"
        );
    }
}

#[test]
fn test_windows_disjoint_from_all_data() {
    let mut rng = XorShift::new(42);
    let spans = random_spans(&mut rng, 120);

    let mut index = IntervalIndex::new();
    for (key, span) in &spans {
        index.insert(key.clone(), *span);
    }

    // Entirely before every span start.
    let early_start = base() - Duration::days(400);
    let early_end = base() - Duration::days(399);
    assert!(index.overlapping(early_start, early_end).is_empty());
    assert_eq!(naive_overlap(&spans, early_start, early_end), Vec::<ComponentKey>::new());

    // Entirely after: only the open-ended spans survive.
    let late_start = base() + Duration::days(4000);
    let late_end = late_start + Duration::days(1);
    let mut found = index.overlapping(late_start, late_end);
    found.sort();
    let expected = naive_overlap(&spans, late_start, late_end);
    assert!(!expected.is_empty(), "open-ended spans must match late windows");
    assert_eq!(found, expected);
}

#[test]
fn test_index_stays_consistent_under_replacement_and_removal() {
    let mut rng = XorShift::new(7);
    let mut spans = random_spans(&mut rng, 100);

    let mut index = IntervalIndex::new();
    for (key, span) in &spans {
        index.insert(key.clone(), *span);
    }

    // Replace a third of the spans and drop a few keys entirely.
    for i in (0..spans.len()).step_by(3) {
        let start = base() + Duration::hours(rng.below(5000) as i64);
        let span = Span::closed(start, start + Duration::hours(rng.below(50) as i64));
        spans[i].1 = span;
        index.insert(spans[i].0.clone(), span);
    }
    for i in (0..spans.len()).step_by(7).rev() {
        let (key, _) = spans.remove(i);
        index.remove(&key);
    }
    assert_eq!(index.len(), spans.len());

    for _ in 0..200 {
        let start = base() + Duration::hours(rng.below(6000) as i64 - 500);
        let end = start + Duration::hours(rng.below(250) as i64);

        let mut found = index.overlapping(start, end);
        found.sort();
        assert_eq!(found, naive_overlap(&spans, start, end));
    }
}

#[test]
fn test_zero_length_window_and_span() {
    let mut index = IntervalIndex::new();
    let instant = base() + Duration::hours(10);
    let key = ComponentKey::new("point", None);
    index.insert(key.clone(), Span::closed(instant, instant));

    // A zero-length window exactly on a zero-length span overlaps.
    assert_eq!(index.overlapping(instant, instant), vec![key.clone()]);
    assert!(index
        .overlapping(instant + Duration::seconds(1), instant + Duration::hours(1))
        .is_empty());
    assert!(index
        .overlapping(instant - Duration::hours(1), instant - Duration::seconds(1))
        .is_empty());
}
