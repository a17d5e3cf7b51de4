//! Partition versions and the merged newest-to-oldest view.
//!
//! A partition's cached state is a chain of versions, oldest first. Reads
//! merge the chain newest-to-oldest; populations target the latest version
//! only, eviction the oldest only. The continuity non-overlapping rule
//! (older versions' continuous intervals are a pointwise subset of newer
//! ones) makes the merged continuity flag the OR across versions.
//!
//! Every version carries a sentinel dummy at `AfterAllRows` whose
//! `continuous` flag describes the tail interval.

use crate::entry::{EntryId, RowEntry, RowPayload, VersionId};
use std::collections::BTreeMap;
use std::ops::Bound;
use strata_db_core::{Position, Row, Tombstone};

/// One layer of the version chain: an ordered map from table-domain
/// position to row entry.
#[derive(Debug)]
pub struct PartitionVersion {
    id: VersionId,
    rows: BTreeMap<Position, RowEntry>,
}

impl PartitionVersion {
    pub(crate) fn new(id: VersionId, sentinel: EntryId) -> Self {
        let mut rows = BTreeMap::new();
        rows.insert(Position::after_all_rows(), RowEntry::last_dummy(sentinel));
        PartitionVersion { id, rows }
    }

    pub fn id(&self) -> VersionId {
        self.id
    }

    pub fn entry(&self, pos: &Position) -> Option<&RowEntry> {
        self.rows.get(pos)
    }

    pub fn entry_mut(&mut self, pos: &Position) -> Option<&mut RowEntry> {
        self.rows.get_mut(pos)
    }

    pub fn insert(&mut self, entry: RowEntry) {
        self.rows.insert(entry.position().clone(), entry);
    }

    pub fn remove(&mut self, pos: &Position) -> Option<RowEntry> {
        self.rows.remove(pos)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&RowEntry> {
        self.rows.values().next()
    }

    fn at_or_after(&self, pos: &Position) -> Option<&RowEntry> {
        self.rows.range(pos.clone()..).map(|(_, e)| e).next()
    }

    pub(crate) fn strictly_after(&self, pos: &Position) -> Option<&RowEntry> {
        self.rows
            .range((Bound::Excluded(pos.clone()), Bound::Unbounded))
            .map(|(_, e)| e)
            .next()
    }

    fn at_or_before(&self, pos: &Position) -> Option<&RowEntry> {
        self.rows.range(..=pos.clone()).map(|(_, e)| e).next_back()
    }

    fn strictly_before(&self, pos: &Position) -> Option<&RowEntry> {
        self.rows.range(..pos.clone()).map(|(_, e)| e).next_back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RowEntry> {
        self.rows.values()
    }
}

/// The merged view of all visible versions' entries at one position.
#[derive(Clone, Debug)]
pub struct MergedEntry {
    pub position: Position,
    /// OR of the per-version continuity flags at this position.
    pub continuous: bool,
    /// Interval tombstone: from the newest version holding this position.
    pub range_tombstone: Tombstone,
    /// Tombstone applying to the row itself: max across versions.
    pub rt_for_row: Tombstone,
    pub dummy: bool,
    pub payload: Option<RowPayload>,
    pub newest_version: VersionId,
    pub newest_entry: EntryId,
    /// True iff the newest version holding this position is the partition's
    /// true latest version.
    pub in_latest: bool,
}

/// Interval attributes (continuity flag and covering tombstone).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntervalAttrs {
    pub continuous: bool,
    pub range_tombstone: Tombstone,
}

/// Seek direction for merged lookups.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Seek {
    AtOrAfter,
    StrictlyAfter,
    AtOrBefore,
    StrictlyBefore,
}

/// The whole cached partition: version chain plus partition-level state.
#[derive(Debug)]
pub struct PartitionState {
    versions: Vec<PartitionVersion>,
    static_row: Option<Row>,
    static_row_continuous: bool,
    partition_tombstone: Tombstone,
    next_version_id: u64,
}

impl PartitionState {
    pub(crate) fn new(sentinel: EntryId) -> Self {
        PartitionState {
            versions: vec![PartitionVersion::new(VersionId(0), sentinel)],
            static_row: None,
            static_row_continuous: false,
            partition_tombstone: Tombstone::NONE,
            next_version_id: 1,
        }
    }

    pub fn latest(&self) -> &PartitionVersion {
        self.versions.last().expect("version chain is never empty")
    }

    pub fn latest_mut(&mut self) -> &mut PartitionVersion {
        self.versions
            .last_mut()
            .expect("version chain is never empty")
    }

    pub fn oldest(&self) -> &PartitionVersion {
        self.versions.first().expect("version chain is never empty")
    }

    pub fn oldest_mut(&mut self) -> &mut PartitionVersion {
        self.versions
            .first_mut()
            .expect("version chain is never empty")
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    pub fn version_mut(&mut self, id: VersionId) -> Option<&mut PartitionVersion> {
        self.versions.iter_mut().find(|v| v.id() == id)
    }

    pub(crate) fn push_version(&mut self, sentinel: EntryId) -> VersionId {
        let id = VersionId(self.next_version_id);
        self.next_version_id += 1;
        self.versions.push(PartitionVersion::new(id, sentinel));
        id
    }

    pub fn static_row(&self) -> Option<&Row> {
        self.static_row.as_ref()
    }

    pub fn static_row_continuous(&self) -> bool {
        self.static_row_continuous
    }

    pub fn set_static_row_continuous(&mut self, continuous: bool) {
        self.static_row_continuous = continuous;
    }

    /// Merge a freshly observed static row into the cached one.
    pub fn apply_static_row(&mut self, row: &Row) {
        match &mut self.static_row {
            Some(existing) => existing.apply(row),
            None => self.static_row = Some(row.clone()),
        }
    }

    pub fn partition_tombstone(&self) -> Tombstone {
        self.partition_tombstone
    }

    pub fn set_partition_tombstone(&mut self, tombstone: Tombstone) {
        self.partition_tombstone = tombstone;
    }

    /// Versions visible to a snapshot taken at `visible`, newest first.
    pub(crate) fn visible(
        &self,
        visible: VersionId,
    ) -> impl Iterator<Item = &PartitionVersion> {
        self.versions.iter().rev().filter(move |v| v.id() <= visible)
    }

    /// Merge the entries of all visible versions at exactly `pos`.
    pub(crate) fn merge_at(&self, visible: VersionId, pos: &Position) -> Option<MergedEntry> {
        let latest_id = self.latest().id();
        let mut merged: Option<MergedEntry> = None;
        for version in self.visible(visible) {
            let Some(entry) = version.entry(pos) else {
                continue;
            };
            match &mut merged {
                None => {
                    merged = Some(MergedEntry {
                        position: pos.clone(),
                        continuous: entry.continuous(),
                        range_tombstone: entry.range_tombstone(),
                        rt_for_row: entry.range_tombstone(),
                        dummy: entry.is_dummy(),
                        payload: entry.payload().cloned(),
                        newest_version: version.id(),
                        newest_entry: entry.id(),
                        in_latest: version.id() == latest_id,
                    });
                }
                Some(m) => {
                    m.continuous |= entry.continuous();
                    m.rt_for_row = m.rt_for_row.max(entry.range_tombstone());
                    if m.payload.is_none() {
                        m.payload = entry.payload().cloned();
                        m.dummy = m.payload.is_none();
                    }
                }
            }
        }
        merged
    }

    /// Seek the nearest merged position in `dir` from `pos` and merge there.
    pub(crate) fn seek_merged(
        &self,
        visible: VersionId,
        pos: &Position,
        dir: Seek,
    ) -> Option<MergedEntry> {
        let mut best: Option<Position> = None;
        for version in self.visible(visible) {
            let candidate = match dir {
                Seek::AtOrAfter => version.at_or_after(pos),
                Seek::StrictlyAfter => version.strictly_after(pos),
                Seek::AtOrBefore => version.at_or_before(pos),
                Seek::StrictlyBefore => version.strictly_before(pos),
            };
            let Some(entry) = candidate else { continue };
            let better = match &best {
                None => true,
                Some(b) => match dir {
                    Seek::AtOrAfter | Seek::StrictlyAfter => entry.position() < b,
                    Seek::AtOrBefore | Seek::StrictlyBefore => entry.position() > b,
                },
            };
            if better {
                best = Some(entry.position().clone());
            }
        }
        best.and_then(|p| self.merge_at(visible, &p))
    }

    /// Merged attributes of the interval *above* `pos` in table order, i.e.
    /// of the first merged entry strictly after `pos`. The sentinel entry
    /// guarantees one exists below `AfterAllRows`; past it the tail is
    /// trivially row-free.
    pub(crate) fn interval_after(&self, visible: VersionId, pos: &Position) -> IntervalAttrs {
        match self.seek_merged(visible, pos, Seek::StrictlyAfter) {
            Some(m) => IntervalAttrs {
                continuous: m.continuous,
                range_tombstone: m.range_tombstone,
            },
            None => IntervalAttrs {
                continuous: true,
                range_tombstone: Tombstone::NONE,
            },
        }
    }

    /// Merged attributes of the interval below the first entry.
    pub(crate) fn leading_interval(&self, visible: VersionId) -> IntervalAttrs {
        let mut first: Option<Position> = None;
        for version in self.visible(visible) {
            if let Some(entry) = version.first() {
                let better = first
                    .as_ref()
                    .map(|f| entry.position() < f)
                    .unwrap_or(true);
                if better {
                    first = Some(entry.position().clone());
                }
            }
        }
        match first.and_then(|p| self.merge_at(visible, &p)) {
            Some(m) => IntervalAttrs {
                continuous: m.continuous,
                range_tombstone: m.range_tombstone,
            },
            None => IntervalAttrs {
                continuous: true,
                range_tombstone: Tombstone::NONE,
            },
        }
    }
}
