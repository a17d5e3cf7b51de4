//! The snapshot row cursor: a stable, revalidatable iterator over the
//! merged versions of one partition snapshot.
//!
//! The cursor presents positions in the *query* domain and walks entries in
//! query order, merging the visible versions newest-to-oldest at each
//! position. It never holds raw iterators into the store: it remembers the
//! current position and the arena generation, and re-seeks on `maybe_refresh`
//! after the generation has moved (eviction, explicit invalidation).
//!
//! Attribute accessors read the store live, so flag updates made by the
//! reader's own populations are visible without an explicit refresh.
//!
//! Interval attributes (`continuous`, `range_tombstone`) describe the
//! interval between the previous query-order entry and the current one:
//! - forward, that is the current entry's own flags;
//! - reversed, it is the flags of the current entry's *table successor*
//!   (or of the first table entry once the cursor fell off the low end).

use crate::entry::{EntryId, VersionId};
use crate::region::AllocError;
use crate::snapshot::{NewEntry, PartitionSnapshot, RowWeakRef, SnapshotHandle};
use crate::version::{IntervalAttrs, MergedEntry, Seek};
use strata_db_core::{ClusteringRow, DomainCmp, Position, Tombstone};

/// Result of promoting the cursor's entry into the latest version.
#[derive(Clone, Copy, Debug)]
pub struct EnsureLatest {
    pub entry: EntryId,
    pub version: VersionId,
    pub inserted: bool,
}

/// Cursor over a snapshot's merged row entries.
#[derive(Debug)]
pub struct SnapshotRowCursor {
    snapshot: SnapshotHandle,
    cmp: DomainCmp,
    /// Table-domain position of the current entry; `None` after a reversed
    /// walk fell off the low end of the store.
    current: Option<Position>,
    positioned: bool,
    generation: Option<u64>,
}

impl SnapshotRowCursor {
    pub fn new(snapshot: SnapshotHandle, reversed: bool) -> Self {
        SnapshotRowCursor {
            snapshot,
            cmp: DomainCmp::new(reversed),
            current: None,
            positioned: false,
            generation: None,
        }
    }

    fn reversed(&self) -> bool {
        self.cmp.reversed
    }

    /// True while the cursor's position survived the last arena generation.
    pub fn iterators_valid(&self) -> bool {
        self.positioned && self.generation == Some(self.snapshot.region().generation())
    }

    /// Revalidate without moving; legal only when the current entry is known
    /// to have survived the invalidation.
    pub fn force_valid(&mut self) {
        self.generation = Some(self.snapshot.region().generation());
    }

    /// Query-domain position of the current entry; the stream end once the
    /// cursor is exhausted.
    pub fn position(&self) -> Position {
        match &self.current {
            Some(table_pos) => self.cmp.to_query(table_pos),
            None => Position::after_all_rows(),
        }
    }

    /// Move to the first entry at query position >= `q_pos`. Returns true
    /// iff the cursor landed exactly on `q_pos`.
    pub fn advance_to(&mut self, q_pos: &Position) -> bool {
        let t_pos = self.cmp.to_table(q_pos);
        let dir = if self.reversed() {
            Seek::AtOrBefore
        } else {
            Seek::AtOrAfter
        };
        let found = self
            .snapshot
            .with_state(|s| s.seek_merged(self.snapshot.version(), &t_pos, dir));
        self.current = found.map(|m| m.position);
        self.positioned = true;
        self.generation = Some(self.snapshot.region().generation());
        matches!(&self.current, Some(p) if *p == t_pos)
    }

    /// Step to the next entry in query order. Returns false once the cursor
    /// has no concrete entry under it.
    pub fn advance(&mut self) -> bool {
        let Some(cur) = self.current.clone() else {
            return false;
        };
        let dir = if self.reversed() {
            Seek::StrictlyBefore
        } else {
            Seek::StrictlyAfter
        };
        let found = self
            .snapshot
            .with_state(|s| s.seek_merged(self.snapshot.version(), &cur, dir));
        self.current = found.map(|m| m.position);
        self.generation = Some(self.snapshot.region().generation());
        self.current.is_some()
    }

    /// Re-seek to the remembered position after an invalidation. Returns
    /// true iff the position is unchanged (no entry appeared or vanished
    /// under the cursor).
    pub fn maybe_refresh(&mut self) -> bool {
        if self.iterators_valid() {
            return true;
        }
        if !self.positioned {
            return true;
        }
        let q = self.position();
        self.advance_to(&q);
        self.cmp.eq(&self.position(), &q)
    }

    fn merged(&self) -> Option<MergedEntry> {
        let pos = self.current.as_ref()?;
        self.snapshot
            .with_state(|s| s.merge_at(self.snapshot.version(), pos))
    }

    fn interval(&self) -> IntervalAttrs {
        if !self.reversed() {
            // Forward: the current entry's own flags. Past the sentinel the
            // tail is trivially row-free.
            match self.merged() {
                Some(m) => IntervalAttrs {
                    continuous: m.continuous,
                    range_tombstone: m.range_tombstone,
                },
                None => IntervalAttrs {
                    continuous: true,
                    range_tombstone: Tombstone::NONE,
                },
            }
        } else {
            self.snapshot.with_state(|s| match &self.current {
                Some(pos) => s.interval_after(self.snapshot.version(), pos),
                None => s.leading_interval(self.snapshot.version()),
            })
        }
    }

    /// Whether the interval entering the current position is known
    /// row-free.
    pub fn continuous(&self) -> bool {
        self.interval().continuous
    }

    /// The tombstone covering the interval entering the current position.
    pub fn range_tombstone(&self) -> Tombstone {
        self.interval().range_tombstone
    }

    /// The tombstone applying to the row at the cursor itself.
    pub fn range_tombstone_for_row(&self) -> Tombstone {
        self.merged().map(|m| m.rt_for_row).unwrap_or(Tombstone::NONE)
    }

    pub fn dummy(&self) -> bool {
        self.merged().map(|m| m.dummy).unwrap_or(true)
    }

    /// The clustering row under the cursor, for non-dummy entries.
    pub fn row(&self) -> Option<ClusteringRow> {
        let m = self.merged()?;
        let payload = m.payload?;
        let key = m.position.key()?.clone();
        Some(ClusteringRow::new(key, payload.tombstone, payload.row))
    }

    /// True iff the latest version holds an entry at the current position.
    pub fn in_latest(&self) -> bool {
        self.merged().map(|m| m.in_latest).unwrap_or(false)
    }

    /// A weak reference to the current entry.
    pub fn weakref(&self) -> Option<RowWeakRef> {
        self.merged()
            .map(|m| RowWeakRef::new(m.position, m.newest_entry, m.newest_version))
    }

    /// Mark the current entry recently used.
    pub fn touch(&self) {
        if let Some(m) = self.merged() {
            self.snapshot.tracker().touch_entry(m.newest_entry);
        }
    }

    /// Make sure the latest version holds an entry at the current position,
    /// promoting with a dummy that preserves the interval it splits.
    pub fn ensure_entry_in_latest(&mut self) -> Result<EnsureLatest, AllocError> {
        let m = self.merged().ok_or(AllocError)?;
        if m.in_latest {
            return Ok(EnsureLatest {
                entry: m.newest_entry,
                version: m.newest_version,
                inserted: false,
            });
        }
        let (entry, inserted) = self
            .snapshot
            .insert_in_latest(NewEntry::dummy(m.position).inheriting())?;
        let version = self.snapshot.with_state(|s| s.latest().id());
        Ok(EnsureLatest {
            entry,
            version,
            inserted,
        })
    }

    pub fn snapshot(&self) -> &PartitionSnapshot {
        &self.snapshot
    }
}
