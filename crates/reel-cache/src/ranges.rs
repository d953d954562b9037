//! Sorted, disjoint byte-range bookkeeping for a single cache entry.

use std::ops::Range;

/// A set of half-open byte ranges kept sorted and maximally merged.
///
/// Adjacent and overlapping ranges collapse into one, so the set never holds two
/// ranges that touch. That keeps [`RangeSet::contiguous_from`] a single lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<Range<u64>>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `range`, returning how many bytes were not covered before.
    pub fn insert(&mut self, range: Range<u64>) -> u64 {
        if range.start >= range.end {
            return 0;
        }
        let added = range.end - range.start - self.covered_within(&range);

        // First range whose end reaches the new start (touching counts).
        let first = self.ranges.partition_point(|r| r.end < range.start);
        // One past the last range whose start is not beyond the new end.
        let last = self.ranges.partition_point(|r| r.start <= range.end);

        let mut merged = range;
        if first < last {
            merged.start = merged.start.min(self.ranges[first].start);
            merged.end = merged.end.max(self.ranges[last - 1].end);
        }
        self.ranges.splice(first..last, std::iter::once(merged));
        added
    }

    /// Number of bytes of `range` already present.
    pub fn covered_within(&self, range: &Range<u64>) -> u64 {
        let first = self.ranges.partition_point(|r| r.end <= range.start);
        self.ranges[first..]
            .iter()
            .take_while(|r| r.start < range.end)
            .map(|r| r.end.min(range.end) - r.start.max(range.start))
            .sum()
    }

    /// Sub-ranges of `range` that are not present yet.
    pub fn missing_within(&self, range: Range<u64>) -> Vec<Range<u64>> {
        let mut out = Vec::new();
        let mut cursor = range.start;
        let first = self.ranges.partition_point(|r| r.end <= range.start);
        for r in self.ranges[first..].iter().take_while(|r| r.start < range.end) {
            if r.start > cursor {
                out.push(cursor..r.start);
            }
            cursor = cursor.max(r.end);
        }
        if cursor < range.end {
            out.push(cursor..range.end);
        }
        out
    }

    /// Contiguous bytes present starting at `offset`, capped at `length`.
    pub fn contiguous_from(&self, offset: u64, length: u64) -> u64 {
        let idx = self.ranges.partition_point(|r| r.end <= offset);
        match self.ranges.get(idx) {
            Some(r) if r.start <= offset => (r.end - offset).min(length),
            _ => 0,
        }
    }

    /// Total number of bytes present.
    pub fn total(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn as_slice(&self) -> &[Range<u64>] {
        &self.ranges
    }
}
