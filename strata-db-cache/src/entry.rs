//! Row entries: the records of the ordered per-version store.

use strata_db_core::{Position, Row, Tombstone};

/// Identifier of one cache entry, stable for the entry's lifetime.
/// Used by the LRU and by weak back-references.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntryId(pub u64);

/// Identifier of one partition version within the version chain.
/// Monotonically increasing; higher means newer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VersionId(pub u64);

/// The payload of a non-dummy entry: the row tombstone and cells.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RowPayload {
    pub tombstone: Tombstone,
    pub row: Row,
}

/// One record of the row-entry store.
///
/// `continuous == true` means the open interval from the predecessor entry
/// up to this entry is known to contain no other rows and is covered by
/// `range_tombstone`. A dummy entry carries no payload; it anchors a
/// continuity or range-tombstone boundary.
#[derive(Clone, Debug)]
pub struct RowEntry {
    id: EntryId,
    position: Position, // table domain
    payload: Option<RowPayload>,
    continuous: bool,
    range_tombstone: Tombstone,
}

impl RowEntry {
    /// A non-dummy entry holding a row.
    pub fn row(id: EntryId, position: Position, payload: RowPayload) -> Self {
        RowEntry {
            id,
            position,
            payload: Some(payload),
            continuous: false,
            range_tombstone: Tombstone::NONE,
        }
    }

    /// A dummy entry anchoring a boundary.
    pub fn dummy(id: EntryId, position: Position) -> Self {
        RowEntry {
            id,
            position,
            payload: None,
            continuous: false,
            range_tombstone: Tombstone::NONE,
        }
    }

    /// The sentinel dummy every version carries at `AfterAllRows`; its
    /// `continuous` flag describes the tail interval.
    pub fn last_dummy(id: EntryId) -> Self {
        RowEntry::dummy(id, Position::after_all_rows())
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn payload(&self) -> Option<&RowPayload> {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut RowPayload> {
        self.payload.as_mut()
    }

    pub fn is_dummy(&self) -> bool {
        self.payload.is_none()
    }

    pub fn continuous(&self) -> bool {
        self.continuous
    }

    pub fn range_tombstone(&self) -> Tombstone {
        self.range_tombstone
    }

    pub fn set_continuous(&mut self, continuous: bool) {
        self.continuous = continuous;
    }

    pub fn set_range_tombstone(&mut self, tombstone: Tombstone) {
        self.range_tombstone = tombstone;
    }
}
