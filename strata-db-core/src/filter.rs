//! Clustering-key filter ranges.
//!
//! A filter is an ordered, non-overlapping sequence of key ranges in
//! query-schema order. Each range converts to a half-open interval of
//! positions: an inclusive start bound becomes `before(k)`, an exclusive
//! start `after(k)`; an inclusive end becomes `after(k)` (exclusive cap),
//! an exclusive end `before(k)`. Missing bounds extend to the partition
//! extremes.

use crate::key::ClusteringKey;
use crate::position::Position;

/// A half-open interval of positions `[start, end)` in query order.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PositionRange {
    pub start: Position,
    pub end: Position,
}

impl PositionRange {
    pub fn new(start: Position, end: Position) -> Self {
        PositionRange { start, end }
    }

    /// The whole-partition range.
    pub fn full() -> Self {
        PositionRange {
            start: Position::before_all_rows(),
            end: Position::after_all_rows(),
        }
    }
}

/// One clustering-key range: optional `(key, inclusive)` bounds in query
/// order.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ClusteringRange {
    start: Option<(ClusteringKey, bool)>,
    end: Option<(ClusteringKey, bool)>,
}

impl ClusteringRange {
    /// The unbounded range.
    pub fn full() -> Self {
        ClusteringRange::default()
    }

    /// A singular range matching exactly one row.
    pub fn single_row(key: impl Into<ClusteringKey>) -> Self {
        let key = key.into();
        ClusteringRange {
            start: Some((key.clone(), true)),
            end: Some((key, true)),
        }
    }

    pub fn starting_at(key: impl Into<ClusteringKey>, inclusive: bool) -> Self {
        ClusteringRange {
            start: Some((key.into(), inclusive)),
            end: None,
        }
    }

    pub fn between(
        start: impl Into<ClusteringKey>,
        start_inclusive: bool,
        end: impl Into<ClusteringKey>,
        end_inclusive: bool,
    ) -> Self {
        ClusteringRange {
            start: Some((start.into(), start_inclusive)),
            end: Some((end.into(), end_inclusive)),
        }
    }

    pub fn ending_at(key: impl Into<ClusteringKey>, inclusive: bool) -> Self {
        ClusteringRange {
            start: None,
            end: Some((key.into(), inclusive)),
        }
    }

    /// True iff this range has an explicit start bound.
    pub fn has_start_bound(&self) -> bool {
        self.start.is_some()
    }

    /// True iff this range matches exactly one clustering key.
    pub fn is_single_row(&self) -> bool {
        match (&self.start, &self.end) {
            (Some((ks, true)), Some((ke, true))) => ks == ke,
            _ => false,
        }
    }

    /// The singular key of a single-row range.
    pub fn single_row_key(&self) -> Option<&ClusteringKey> {
        if self.is_single_row() {
            self.start.as_ref().map(|(k, _)| k)
        } else {
            None
        }
    }

    /// Start of the position interval, in query domain.
    pub fn start_position(&self) -> Position {
        match &self.start {
            None => Position::before_all_rows(),
            Some((k, true)) => Position::before_key(k.clone()),
            Some((k, false)) => Position::after_key(k.clone()),
        }
    }

    /// Exclusive end of the position interval, in query domain.
    pub fn end_position(&self) -> Position {
        match &self.end {
            None => Position::after_all_rows(),
            Some((k, true)) => Position::after_key(k.clone()),
            Some((k, false)) => Position::before_key(k.clone()),
        }
    }
}

/// The ordered, non-overlapping filter sequence for one read.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct FilterRanges {
    ranges: Vec<ClusteringRange>,
}

impl FilterRanges {
    pub fn new(ranges: Vec<ClusteringRange>) -> Self {
        FilterRanges { ranges }
    }

    /// The single whole-partition range.
    pub fn full() -> Self {
        FilterRanges {
            ranges: vec![ClusteringRange::full()],
        }
    }

    /// No ranges: the read finishes right after the static row.
    pub fn empty() -> Self {
        FilterRanges::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&ClusteringRange> {
        self.ranges.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusteringRange> {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_to_positions() {
        let r = ClusteringRange::between("a", true, "c", false);
        assert_eq!(r.start_position(), Position::before_key("a"));
        assert_eq!(r.end_position(), Position::before_key("c"));

        let r = ClusteringRange::between("a", false, "c", true);
        assert_eq!(r.start_position(), Position::after_key("a"));
        assert_eq!(r.end_position(), Position::after_key("c"));

        let r = ClusteringRange::full();
        assert_eq!(r.start_position(), Position::before_all_rows());
        assert_eq!(r.end_position(), Position::after_all_rows());
        assert!(!r.has_start_bound());
    }

    #[test]
    fn single_row_detection() {
        assert!(ClusteringRange::single_row("k").is_single_row());
        assert_eq!(
            ClusteringRange::single_row("k").single_row_key(),
            Some(&ClusteringKey::from("k"))
        );
        assert!(!ClusteringRange::between("a", true, "b", true).is_single_row());
        assert!(!ClusteringRange::full().is_single_row());
    }
}
