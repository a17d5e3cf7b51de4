//! The fragment stream vocabulary.
//!
//! A partition read produces an ordered stream of fragments: exactly one
//! `PartitionStart`, an optional static row, interleaved clustering rows and
//! range-tombstone changes in query order, and exactly one `PartitionEnd`.
//!
//! A range-tombstone change with a non-empty tombstone *opens* a range
//! tombstone at its position; an empty one *closes* the active tombstone.

use crate::key::{ClusteringKey, DecoratedKey};
use crate::position::Position;
use crate::row::Row;
use crate::tombstone::Tombstone;

/// One clustering row: key, row tombstone, and regular cells.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClusteringRow {
    pub key: ClusteringKey,
    pub tombstone: Tombstone,
    pub row: Row,
}

impl ClusteringRow {
    pub fn new(key: impl Into<ClusteringKey>, tombstone: Tombstone, row: Row) -> Self {
        ClusteringRow {
            key: key.into(),
            tombstone,
            row,
        }
    }

    /// The row's position in the stream.
    pub fn position(&self) -> Position {
        Position::at_key(self.key.clone())
    }
}

/// A range-tombstone change event at a given position.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RangeTombstoneChange {
    pub position: Position,
    pub tombstone: Tombstone,
}

impl RangeTombstoneChange {
    pub fn new(position: Position, tombstone: Tombstone) -> Self {
        RangeTombstoneChange {
            position,
            tombstone,
        }
    }

    /// True iff this change opens a tombstone.
    pub fn is_opening(&self) -> bool {
        self.tombstone.is_some()
    }

    /// True iff this change closes the active tombstone.
    pub fn is_closing(&self) -> bool {
        self.tombstone.is_none()
    }
}

/// One element of the partition fragment stream.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Fragment {
    PartitionStart {
        key: DecoratedKey,
        tombstone: Tombstone,
    },
    StaticRow {
        row: Row,
    },
    ClusteringRow(ClusteringRow),
    RangeTombstoneChange(RangeTombstoneChange),
    PartitionEnd,
}

impl Fragment {
    pub fn is_static_row(&self) -> bool {
        matches!(self, Fragment::StaticRow { .. })
    }

    pub fn is_clustering_row(&self) -> bool {
        matches!(self, Fragment::ClusteringRow(_))
    }

    pub fn is_range_tombstone_change(&self) -> bool {
        matches!(self, Fragment::RangeTombstoneChange(_))
    }

    pub fn is_partition_end(&self) -> bool {
        matches!(self, Fragment::PartitionEnd)
    }

    /// The clustering position of a row or range-tombstone-change fragment.
    pub fn position(&self) -> Option<Position> {
        match self {
            Fragment::ClusteringRow(cr) => Some(cr.position()),
            Fragment::RangeTombstoneChange(rtc) => Some(rtc.position.clone()),
            _ => None,
        }
    }
}
