//! The position algebra: a total order over clustering positions within a
//! partition.
//!
//! A position is one of `BeforeAllRows`, `Key { key, weight }` with weight
//! `Before`/`At`/`After`, or `AfterAllRows`. Only `At` positions are
//! clustering-row positions; every bound tracked by the reader stays on a
//! non-row position.
//!
//! Two domains share this one type:
//! - **table domain**: the storage order (`Ord` on `Position`),
//! - **query domain**: the emission order, which is the table order unless
//!   the read is reversed.
//!
//! `reversed()` is the total bijection between the two; [`DomainCmp`]
//! compares query-domain positions without materializing the mapping.

use crate::key::ClusteringKey;
use std::cmp::Ordering;

/// Placement of a position relative to its clustering key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum BoundWeight {
    Before,
    At,
    After,
}

/// A total-ordered position within a partition.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Position {
    BeforeAllRows,
    Key {
        key: ClusteringKey,
        weight: BoundWeight,
    },
    AfterAllRows,
}

impl Position {
    pub fn before_all_rows() -> Self {
        Position::BeforeAllRows
    }

    pub fn after_all_rows() -> Self {
        Position::AfterAllRows
    }

    pub fn before_key(key: impl Into<ClusteringKey>) -> Self {
        Position::Key {
            key: key.into(),
            weight: BoundWeight::Before,
        }
    }

    pub fn at_key(key: impl Into<ClusteringKey>) -> Self {
        Position::Key {
            key: key.into(),
            weight: BoundWeight::At,
        }
    }

    pub fn after_key(key: impl Into<ClusteringKey>) -> Self {
        Position::Key {
            key: key.into(),
            weight: BoundWeight::After,
        }
    }

    /// The clustering key, if this position is attached to one.
    pub fn key(&self) -> Option<&ClusteringKey> {
        match self {
            Position::Key { key, .. } => Some(key),
            _ => None,
        }
    }

    /// True iff this is an `At` position, i.e. the position of a clustering
    /// row itself.
    pub fn is_clustering_row(&self) -> bool {
        matches!(
            self,
            Position::Key {
                weight: BoundWeight::At,
                ..
            }
        )
    }

    pub fn is_before_all_rows(&self) -> bool {
        matches!(self, Position::BeforeAllRows)
    }

    pub fn is_after_all_rows(&self) -> bool {
        matches!(self, Position::AfterAllRows)
    }

    /// The greatest non-row position at or before `self`.
    ///
    /// For a row position `at(K)` this is `before(K)`; non-row positions map
    /// to themselves. Used to turn a row position into an exclusive range
    /// cap without skipping the row's predecessor interval.
    pub fn before(&self) -> Position {
        match self {
            Position::Key {
                key,
                weight: BoundWeight::At,
            } => Position::Key {
                key: key.clone(),
                weight: BoundWeight::Before,
            },
            other => other.clone(),
        }
    }

    /// The query/table bijection: swaps the extremes and the before/after
    /// weights, leaving row positions fixed.
    ///
    /// An involution: `p.reversed().reversed() == p`.
    pub fn reversed(&self) -> Position {
        match self {
            Position::BeforeAllRows => Position::AfterAllRows,
            Position::AfterAllRows => Position::BeforeAllRows,
            Position::Key { key, weight } => Position::Key {
                key: key.clone(),
                weight: match weight {
                    BoundWeight::Before => BoundWeight::After,
                    BoundWeight::At => BoundWeight::At,
                    BoundWeight::After => BoundWeight::Before,
                },
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Position::BeforeAllRows => 0,
            Position::Key { .. } => 1,
            Position::AfterAllRows => 2,
        }
    }
}

// Table-domain total order.
impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Position::Key { key: ka, weight: wa },
                Position::Key { key: kb, weight: wb },
            ) => ka.cmp(kb).then(wa.cmp(wb)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Comparator for query-domain positions under a read direction.
///
/// `BeforeAllRows`/`AfterAllRows` and the bound weights are query-relative,
/// so only the key comparison flips when the read is reversed.
#[derive(Clone, Copy, Debug)]
pub struct DomainCmp {
    pub reversed: bool,
}

impl DomainCmp {
    pub fn new(reversed: bool) -> Self {
        DomainCmp { reversed }
    }

    pub fn cmp(&self, a: &Position, b: &Position) -> Ordering {
        match (a, b) {
            (
                Position::Key { key: ka, weight: wa },
                Position::Key { key: kb, weight: wb },
            ) => {
                let keys = if self.reversed {
                    kb.cmp(ka)
                } else {
                    ka.cmp(kb)
                };
                keys.then(wa.cmp(wb))
            }
            _ => a.rank().cmp(&b.rank()),
        }
    }

    pub fn eq(&self, a: &Position, b: &Position) -> bool {
        self.cmp(a, b) == Ordering::Equal
    }

    pub fn lt(&self, a: &Position, b: &Position) -> bool {
        self.cmp(a, b) == Ordering::Less
    }

    /// Maps a query-domain position into the table domain (and back; the
    /// mapping is an involution).
    pub fn to_table(&self, pos: &Position) -> Position {
        if self.reversed {
            pos.reversed()
        } else {
            pos.clone()
        }
    }

    /// Maps a table-domain position into the query domain. The same
    /// involution as [`DomainCmp::to_table`], named for the direction.
    pub fn to_query(&self, pos: &Position) -> Position {
        self.to_table(pos)
    }

    /// True iff no clustering row can exist strictly between `a` and `b` in
    /// query order. Conservative: key-less positions admit unknown rows.
    pub fn no_clustering_row_between(&self, a: &Position, b: &Position) -> bool {
        if self.cmp(a, b) != Ordering::Less {
            return true;
        }
        match (a.key(), b.key()) {
            (Some(ka), Some(kb)) => ka == kb,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(k: &str) -> Position {
        Position::at_key(k)
    }

    #[test]
    fn table_order() {
        let mut positions = vec![
            Position::after_all_rows(),
            Position::at_key("b"),
            Position::before_key("b"),
            Position::after_key("a"),
            Position::before_all_rows(),
            Position::at_key("a"),
        ];
        positions.sort();
        assert_eq!(
            positions,
            vec![
                Position::before_all_rows(),
                Position::at_key("a"),
                Position::after_key("a"),
                Position::before_key("b"),
                Position::at_key("b"),
                Position::after_all_rows(),
            ]
        );
    }

    #[test]
    fn reversed_is_involution() {
        for p in [
            Position::before_all_rows(),
            Position::before_key("x"),
            at("x"),
            Position::after_key("x"),
            Position::after_all_rows(),
        ] {
            assert_eq!(p.reversed().reversed(), p);
        }
    }

    #[test]
    fn query_cmp_reversed_flips_keys_not_weights() {
        let cmp = DomainCmp::new(true);
        // keys descend in reversed query order
        assert!(cmp.lt(&at("b"), &at("a")));
        // weights still ascend within one key
        assert!(cmp.lt(&Position::before_key("a"), &at("a")));
        assert!(cmp.lt(&at("a"), &Position::after_key("a")));
        // extremes stay domain-relative
        assert!(cmp.lt(&Position::before_all_rows(), &at("b")));
        assert!(cmp.lt(&at("a"), &Position::after_all_rows()));
    }

    #[test]
    fn query_cmp_agrees_with_bijection() {
        let cmp = DomainCmp::new(true);
        let positions = [
            Position::before_all_rows(),
            Position::before_key("a"),
            at("a"),
            Position::after_key("a"),
            at("b"),
            Position::after_all_rows(),
        ];
        for a in &positions {
            for b in &positions {
                assert_eq!(cmp.cmp(a, b), b.reversed().cmp(&a.reversed()));
            }
        }
    }

    #[test]
    fn before_floors_row_positions_only() {
        assert_eq!(at("k").before(), Position::before_key("k"));
        assert_eq!(Position::after_key("k").before(), Position::after_key("k"));
        assert_eq!(
            Position::before_all_rows().before(),
            Position::before_all_rows()
        );
    }

    #[test]
    fn no_row_between_same_key() {
        let cmp = DomainCmp::new(false);
        assert!(cmp.no_clustering_row_between(&at("k"), &Position::after_key("k")));
        assert!(!cmp.no_clustering_row_between(&at("a"), &Position::before_key("b")));
        assert!(!cmp.no_clustering_row_between(&at("a"), &Position::after_all_rows()));
        // a >= b is trivially row-free
        assert!(cmp.no_clustering_row_between(&at("b"), &at("a")));
    }
}
