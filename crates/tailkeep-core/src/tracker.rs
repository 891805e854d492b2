use std::collections::BTreeMap;

use crate::error::{source_chain, InvalidContent, InvalidMaxOffset, InvalidRange};
use crate::range::Range;

/// An ordered, non-overlapping, non-adjacent sequence of [`Range`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeList(Vec<Range>);

impl RangeList {
    pub fn as_slice(&self) -> &[Range] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Range> {
        self.0
    }

    /// The last (highest-`start`) range, or a zero range if empty.
    pub fn last(&self) -> Range {
        self.0.last().copied().unwrap_or_default()
    }

    /// `true` for the "backward-compatible" shapes: empty, or a single
    /// range starting at zero. Snapshots with this shape can be read by
    /// consumers that only understand a single `max_offset`.
    pub fn only_uses_max_offset(&self) -> bool {
        match self.0.as_slice() {
            [] => true,
            [only] => only.start == 0,
            _ => false,
        }
    }
}

impl From<Vec<Range>> for RangeList {
    fn from(v: Vec<Range>) -> Self {
        Self(v)
    }
}

impl IntoIterator for RangeList {
    type Item = Range;
    type IntoIter = std::vec::IntoIter<Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Tracks the disjoint byte/record ranges observed for a single source.
///
/// Two variants, selected by the configured capacity (mirrors
/// `max_persist_items` on the state manager): [`RangeTracker::Single`] keeps
/// only the maximum observed end (the historical single-offset behavior),
/// [`RangeTracker::Multi`] keeps an ordered, merged set of ranges bounded by
/// an optional capacity.
#[derive(Debug, Clone)]
pub enum RangeTracker {
    Single { max_end: u64, seq: u64 },
    Multi { ranges: BTreeMap<u64, Range>, cap: usize },
}

impl RangeTracker {
    /// `capacity == 1` selects [`RangeTracker::Single`]; any other value
    /// (including 0 or negative, meaning "unbounded") selects
    /// [`RangeTracker::Multi`].
    pub fn new(capacity: i64) -> Self {
        if capacity == 1 {
            RangeTracker::Single { max_end: 0, seq: 0 }
        } else {
            let cap = if capacity > 0 { capacity as usize } else { 0 };
            RangeTracker::Multi { ranges: BTreeMap::new(), cap }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RangeTracker::Single { max_end, .. } => usize::from(*max_end > 0),
            RangeTracker::Multi { ranges, .. } => ranges.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        match self {
            RangeTracker::Single { max_end, seq } => {
                *max_end = 0;
                *seq = 0;
            }
            RangeTracker::Multi { ranges, .. } => ranges.clear(),
        }
    }

    pub fn ranges(&self) -> RangeList {
        match self {
            RangeTracker::Single { max_end, seq } => {
                if *max_end > 0 {
                    vec![Range { start: 0, end: *max_end, seq: *seq }].into()
                } else {
                    Vec::new().into()
                }
            }
            RangeTracker::Multi { ranges, .. } => ranges.values().copied().collect::<Vec<_>>().into(),
        }
    }

    /// Merge `r` into the tracked set.
    ///
    /// Returns `false` if `r` is invalid, or already fully covered by an
    /// existing range (a no-op insert is not "dirty").
    pub fn insert(&mut self, r: Range) -> bool {
        if !r.is_valid() {
            return false;
        }

        match self {
            RangeTracker::Single { max_end, seq } => {
                let changed = r.end > *max_end;
                if changed {
                    *max_end = r.end;
                }
                if r.seq > *seq {
                    *seq = r.seq;
                }
                changed
            }
            RangeTracker::Multi { ranges, cap } => {
                if !insert_multi(ranges, r) {
                    return false;
                }
                collapse_over_capacity(ranges, *cap);
                true
            }
        }
    }
}

/// Merge `r` into `ranges`, folding in every overlapping/adjacent neighbor.
///
/// Returns `false` (no-op) if an existing range already fully contains `r`.
fn insert_multi(ranges: &mut BTreeMap<u64, Range>, r: Range) -> bool {
    let mut merged = r;
    let mut remove_keys = Vec::new();

    // Forward scan: candidates with start >= r.start.
    let mut next_key = ranges.range(r.start..).next().map(|(&k, _)| k);
    while let Some(k) = next_key {
        let item = ranges[&k];
        if item.start > merged.end {
            break;
        }
        if item.contains(&r) {
            return false;
        }
        if item.touches(&merged) {
            merged.start = merged.start.min(item.start);
            merged.end = merged.end.max(item.end);
            merged.seq = merged.seq.max(item.seq);
            remove_keys.push(k);
            next_key = k.checked_add(1).and_then(|k1| ranges.range(k1..).next().map(|(&kk, _)| kk));
        } else {
            break;
        }
    }

    // Backward scan: candidates with start < r.start.
    let mut prev_key = ranges.range(..r.start).next_back().map(|(&k, _)| k);
    while let Some(k) = prev_key {
        let item = ranges[&k];
        if item.end < merged.start {
            break;
        }
        if item.contains(&r) {
            return false;
        }
        if item.touches(&merged) {
            merged.start = merged.start.min(item.start);
            merged.end = merged.end.max(item.end);
            merged.seq = merged.seq.max(item.seq);
            remove_keys.push(k);
            prev_key = ranges.range(..k).next_back().map(|(&kk, _)| kk);
        } else {
            break;
        }
    }

    for k in remove_keys {
        ranges.remove(&k);
    }
    ranges.insert(merged.start, merged);
    true
}

/// If a positive capacity is configured and exceeded, merge the two ranges
/// with the smallest `start` into one, reducing the count by one.
fn collapse_over_capacity(ranges: &mut BTreeMap<u64, Range>, cap: usize) {
    if cap == 0 || ranges.len() <= cap {
        return;
    }
    let mut keys = ranges.keys().copied();
    if let (Some(k1), Some(k2)) = (keys.next(), keys.next()) {
        let r1 = ranges.remove(&k1).expect("k1 just yielded by keys()");
        let r2 = ranges.remove(&k2).expect("k2 just yielded by keys()");
        let merged = Range {
            start: r1.start.min(r2.start),
            end: r1.end.max(r2.end),
            seq: r1.seq.max(r2.seq),
        };
        ranges.insert(merged.start, merged);
    }
}

/// Compute the complementary set of half-open ranges inside `[0, u64::MAX)`
/// for a sorted, disjoint `ranges`. Used by gap replay to find stretches of
/// offsets that were never persisted.
pub fn invert_ranges(ranges: &[Range]) -> Vec<Range> {
    let mut gaps = Vec::new();
    let mut prev_end = 0u64;
    for r in ranges {
        if r.start > prev_end {
            gaps.push(Range::new(prev_end, r.start));
        }
        prev_end = prev_end.max(r.end);
    }
    if prev_end < Range::UNBOUNDED_END {
        gaps.push(Range {
            start: prev_end,
            end: Range::UNBOUNDED_END,
            seq: 0,
        });
    }
    gaps
}

fn parse_ranges_line(line: &str) -> Result<Vec<Range>, InvalidRange> {
    line.split(',').map(|s| s.parse::<Range>()).collect()
}

impl RangeTracker {
    /// Serialize as `"{max_end}\n{name}"`, appending `"\n{r1},{r2},…"` when
    /// non-empty. `max_end` is the maximum `end` across all ranges (0 if
    /// empty).
    pub fn marshal_text(&self, name: &str) -> String {
        let ranges = self.ranges();
        let max_end = ranges.as_slice().iter().map(|r| r.end).max().unwrap_or(0);
        let mut out = format!("{max_end}\n{name}");
        if !ranges.as_slice().is_empty() {
            out.push('\n');
            out.push_str(
                &ranges
                    .as_slice()
                    .iter()
                    .map(Range::to_text)
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        out
    }

    /// Parse the three-line envelope described in the module docs, tolerating
    /// the legacy one- and two-line shapes and a malformed line 3 (both
    /// recovered by seeding `[0, max_offset)`).
    ///
    /// Clears `self` first, always. Returns the parsed `name` (empty if
    /// absent). Fails only if line 1 is not a valid `u64`.
    pub fn unmarshal_text(&mut self, text: &str) -> Result<String, InvalidMaxOffset> {
        self.clear();
        if text.is_empty() {
            return Ok(String::new());
        }

        let mut lines = text.split('\n');
        let max_offset_line = lines.next().unwrap_or("");
        let max_offset: u64 = max_offset_line
            .parse()
            .map_err(|_| InvalidMaxOffset(max_offset_line.to_owned()))?;
        let name = lines.next().unwrap_or("").to_owned();

        match lines.next() {
            None => self.seed_backward_compat(max_offset),
            Some(ranges_line) => match parse_ranges_line(ranges_line) {
                Ok(parsed) => {
                    for r in parsed {
                        self.insert(r);
                    }
                }
                Err(source) => {
                    let err = InvalidContent { content: ranges_line.to_owned(), source };
                    tracing::debug!(error = %source_chain(&err), "malformed range list, falling back to max-offset");
                    self.clear();
                    self.seed_backward_compat(max_offset);
                }
            },
        }

        Ok(name)
    }

    fn seed_backward_compat(&mut self, max_offset: u64) {
        if max_offset > 0 {
            self.insert(Range::new(0, max_offset));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ranges_of(tracker: &RangeTracker) -> Vec<(u64, u64)> {
        tracker.ranges().as_slice().iter().map(|r| (r.start, r.end)).collect()
    }

    #[test]
    fn non_overlapping_inserts_preserve_order() {
        let mut t = RangeTracker::new(0);
        assert!(t.insert(Range::new(20, 25)));
        assert!(t.insert(Range::new(0, 5)));
        assert!(t.insert(Range::new(40, 45)));
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(0, 5), (20, 25), (40, 45)]);
    }

    #[test]
    fn adjacent_insert_merges() {
        let mut t = RangeTracker::new(0);
        assert!(t.insert(Range::new(5, 10)));
        assert!(t.insert(Range::new(10, 15)));
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(5, 15)]);
    }

    #[test]
    fn fully_contained_insert_is_noop() {
        let mut t = RangeTracker::new(0);
        assert!(t.insert(Range::new(0, 100)));
        assert!(!t.insert(Range::new(10, 20)));
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(0, 100)]);
    }

    #[test]
    fn spanning_insert_collapses_all() {
        let mut t = RangeTracker::new(0);
        t.insert(Range::new(0, 5));
        t.insert(Range::new(20, 30));
        t.insert(Range::new(45, 50));
        assert!(t.insert(Range::new(0, 50)));
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(0, 50)]);
    }

    #[test]
    fn capacity_collapse_merges_oldest_pair() {
        let mut t = RangeTracker::new(2);
        t.insert(Range::new(0, 5));
        t.insert(Range::new(10, 15));
        t.insert(Range::new(20, 25));
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(0, 15), (20, 25)]);
    }

    #[test]
    fn single_mode_rolls_up_to_max_end() {
        let mut t = RangeTracker::new(1);
        t.insert(Range::new(0, 5));
        t.insert(Range::new(20, 30));
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(0, 30)]);
    }

    #[test]
    fn codec_round_trip_with_payload() {
        let mut t = RangeTracker::new(0);
        let name = t.unmarshal_text("50\nname\n0-5,20-30,45-50").unwrap();
        assert_eq!(name, "name");
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(0, 5), (20, 30), (45, 50)]);
        assert_eq!(t.marshal_text(&name), "50\nname\n0-5,20-30,45-50");
    }

    #[test]
    fn codec_backward_compat_two_line() {
        let mut t = RangeTracker::new(0);
        let name = t.unmarshal_text("2760\nvalid.log").unwrap();
        assert_eq!(name, "valid.log");
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(0, 2760)]);
    }

    #[test]
    fn codec_backward_compat_one_line() {
        let mut t = RangeTracker::new(0);
        let name = t.unmarshal_text("20").unwrap();
        assert_eq!(name, "");
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(0, 20)]);
    }

    #[test]
    fn codec_invalid_max_offset_fails_whole_parse() {
        let mut t = RangeTracker::new(0);
        assert!(t.unmarshal_text("-1\ntest").is_err());
    }

    #[test]
    fn codec_malformed_line_three_falls_back() {
        let mut t = RangeTracker::new(0);
        let name = t.unmarshal_text("50\nname\ntest-test\ntest").unwrap();
        assert_eq!(name, "name");
        pretty_assertions::assert_eq!(ranges_of(&t), vec![(0, 50)]);
    }

    #[test]
    fn codec_empty_input_is_empty() {
        let mut t = RangeTracker::new(0);
        t.insert(Range::new(0, 10));
        assert_eq!(t.unmarshal_text("").unwrap(), "");
        assert!(t.is_empty());
    }

    #[test]
    fn invert_ranges_yields_gaps_and_trailing_unbounded() {
        let ranges = vec![Range::new(0, 2), Range::new(4, 5)];
        let gaps = invert_ranges(&ranges);
        pretty_assertions::assert_eq!(gaps, vec![Range::new(2, 4), Range { start: 5, end: u64::MAX, seq: 0 }]);
    }

    #[test]
    fn invert_ranges_empty_input_is_single_unbounded_gap() {
        let gaps = invert_ranges(&[]);
        pretty_assertions::assert_eq!(gaps, vec![Range { start: 0, end: u64::MAX, seq: 0 }]);
    }

    proptest! {
        #[test]
        fn insert_never_produces_overlapping_or_adjacent_ranges(
            starts in proptest::collection::vec(0u64..1000, 1..20),
            lens in proptest::collection::vec(1u64..20, 1..20),
        ) {
            let mut t = RangeTracker::new(0);
            for (s, l) in starts.into_iter().zip(lens) {
                t.insert(Range::new(s, s + l));
            }
            let ranges = t.ranges().into_vec();
            for w in ranges.windows(2) {
                prop_assert!(w[0].end < w[1].start, "ranges {:?} and {:?} should have merged", w[0], w[1]);
            }
        }

        #[test]
        fn marshal_unmarshal_round_trips(
            starts in proptest::collection::vec(0u64..1000, 0..10),
            lens in proptest::collection::vec(1u64..20, 0..10),
        ) {
            let mut t = RangeTracker::new(0);
            for (s, l) in starts.into_iter().zip(lens) {
                t.insert(Range::new(s, s + l));
            }
            let text = t.marshal_text("source");
            let mut t2 = RangeTracker::new(0);
            let name = t2.unmarshal_text(&text).unwrap();
            prop_assert_eq!(name, "source");
            prop_assert_eq!(t.ranges().into_vec(), t2.ranges().into_vec());
        }
    }
}
