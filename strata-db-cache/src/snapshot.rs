//! Partitions, refcounted snapshots, and weak entry references.
//!
//! A `Partition` owns the shared state (version chain, arena region,
//! tracker). A `PartitionSnapshot` is a refcounted view pinned to the
//! version chain as of snapshot time; populations are only legal against
//! the latest version, eviction against the oldest.

use crate::entry::{EntryId, RowEntry, RowPayload, VersionId};
use crate::region::{AllocError, Region};
use crate::tracker::CacheTracker;
use crate::version::PartitionState;
use parking_lot::RwLock;
use std::sync::Arc;
use strata_db_core::{DecoratedKey, Position, Row, Schema, Tombstone};

/// Refcounted snapshot handle.
pub type SnapshotHandle = Arc<PartitionSnapshot>;

/// Specification of an entry to insert into the latest version.
#[derive(Clone, Debug)]
pub struct NewEntry {
    /// Table-domain position.
    pub position: Position,
    pub payload: Option<RowPayload>,
    pub continuous: bool,
    pub range_tombstone: Tombstone,
    /// When set, `continuous`/`range_tombstone` are taken from the
    /// table-successor entry instead, preserving the continuity of the
    /// interval the new entry splits.
    pub inherit_interval: bool,
}

impl NewEntry {
    pub fn dummy(position: Position) -> Self {
        NewEntry {
            position,
            payload: None,
            continuous: false,
            range_tombstone: Tombstone::NONE,
            inherit_interval: false,
        }
    }

    pub fn row(position: Position, payload: RowPayload, range_tombstone: Tombstone) -> Self {
        NewEntry {
            position,
            payload: Some(payload),
            continuous: false,
            range_tombstone,
            inherit_interval: false,
        }
    }

    pub fn inheriting(mut self) -> Self {
        self.inherit_interval = true;
        self
    }
}

/// A read-only view of one entry's bookkeeping flags.
#[derive(Clone, Debug)]
pub struct EntryFlags {
    pub id: EntryId,
    pub dummy: bool,
    pub continuous: bool,
    pub range_tombstone: Tombstone,
}

/// One cached partition.
#[derive(Debug)]
pub struct Partition {
    schema: Arc<Schema>,
    key: DecoratedKey,
    state: Arc<RwLock<PartitionState>>,
    region: Arc<Region>,
    tracker: Arc<CacheTracker>,
}

impl Partition {
    pub fn new(schema: Arc<Schema>, key: DecoratedKey, tracker: Arc<CacheTracker>) -> Self {
        let sentinel = tracker.next_entry_id();
        tracker.insert(sentinel);
        Partition {
            schema,
            key,
            state: Arc::new(RwLock::new(PartitionState::new(sentinel))),
            region: Arc::new(Region::new()),
            tracker,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn key(&self) -> &DecoratedKey {
        &self.key
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    pub fn tracker(&self) -> &Arc<CacheTracker> {
        &self.tracker
    }

    /// Take a refcounted snapshot pinned to the current latest version.
    pub fn snapshot(&self) -> SnapshotHandle {
        let visible = self.state.read().latest().id();
        Arc::new(PartitionSnapshot {
            schema: self.schema.clone(),
            key: self.key.clone(),
            state: self.state.clone(),
            region: self.region.clone(),
            tracker: self.tracker.clone(),
            visible,
        })
    }

    /// Start a new latest version; existing snapshots stop being latest.
    pub fn add_version(&self) -> VersionId {
        let sentinel = self.tracker.next_entry_id();
        self.tracker.insert(sentinel);
        self.state.write().push_version(sentinel)
    }

    pub fn latest_version_id(&self) -> VersionId {
        self.state.read().latest().id()
    }

    pub fn oldest_version_id(&self) -> VersionId {
        self.state.read().oldest().id()
    }

    pub fn set_partition_tombstone(&self, tombstone: Tombstone) {
        self.state.write().set_partition_tombstone(tombstone);
    }

    /// Seed or overwrite the cached static row.
    pub fn seed_static_row(&self, row: Row, continuous: bool) {
        let mut state = self.state.write();
        state.apply_static_row(&row);
        state.set_static_row_continuous(continuous);
    }

    /// Seed an entry into a specific version, upserting flags when the
    /// position already exists. Intended for writers and tests.
    pub fn seed_entry(
        &self,
        version: VersionId,
        position: Position,
        payload: Option<RowPayload>,
        continuous: bool,
        range_tombstone: Tombstone,
    ) -> EntryId {
        let mut state = self.state.write();
        let tracker = &self.tracker;
        let v = state
            .version_mut(version)
            .expect("seed_entry: unknown version");
        if let Some(existing) = v.entry_mut(&position) {
            existing.set_continuous(continuous);
            existing.set_range_tombstone(range_tombstone);
            if let (Some(slot), Some(p)) = (existing.payload_mut(), payload.as_ref()) {
                *slot = p.clone();
            }
            return existing.id();
        }
        let id = tracker.next_entry_id();
        let mut entry = match payload {
            Some(p) => RowEntry::row(id, position, p),
            None => RowEntry::dummy(id, position),
        };
        entry.set_continuous(continuous);
        entry.set_range_tombstone(range_tombstone);
        v.insert(entry);
        tracker.insert(id);
        id
    }

    /// Evict the entry at `position` from the oldest version.
    ///
    /// Eviction never targets newer versions; that is what keeps the
    /// continuity non-overlapping rule intact. Returns false when the
    /// position holds no entry or holds the sentinel.
    pub fn evict_from_oldest(&self, position: &Position) -> bool {
        if position.is_after_all_rows() {
            return false;
        }
        let removed = {
            let mut state = self.state.write();
            let oldest = state.oldest_mut();
            let removed = oldest.remove(position);
            if removed.is_some() {
                // The successor's continuity claim reached back to the
                // removed entry; it no longer holds.
                if let Some(succ_pos) = oldest
                    .strictly_after(position)
                    .map(|e| e.position().clone())
                {
                    if let Some(succ) = oldest.entry_mut(&succ_pos) {
                        succ.set_continuous(false);
                    }
                }
            }
            removed
        };
        match removed {
            Some(entry) => {
                tracing::trace!(?position, "evicted entry from oldest version");
                self.tracker.remove(entry.id());
                self.tracker.on_eviction();
                self.region.invalidate_references();
                true
            }
            None => false,
        }
    }
}

/// A refcounted, versioned view of one partition's cached state.
#[derive(Debug)]
pub struct PartitionSnapshot {
    schema: Arc<Schema>,
    key: DecoratedKey,
    state: Arc<RwLock<PartitionState>>,
    region: Arc<Region>,
    tracker: Arc<CacheTracker>,
    visible: VersionId,
}

impl PartitionSnapshot {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn key(&self) -> &DecoratedKey {
        &self.key
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    pub fn tracker(&self) -> &Arc<CacheTracker> {
        &self.tracker
    }

    /// The latest version visible to this snapshot.
    pub fn version(&self) -> VersionId {
        self.visible
    }

    /// Mark the partition recently used.
    pub fn touch(&self) {
        self.tracker.on_partition_touch();
    }

    /// True iff this snapshot still sees the partition's latest version.
    pub fn at_latest_version(&self) -> bool {
        self.state.read().latest().id() == self.visible
    }

    /// True iff this snapshot's version is the oldest in the chain.
    pub fn at_oldest_version(&self) -> bool {
        self.state.read().oldest().id() == self.visible
    }

    pub fn partition_tombstone(&self) -> Tombstone {
        self.state.read().partition_tombstone()
    }

    pub fn static_row_continuous(&self) -> bool {
        self.state.read().static_row_continuous()
    }

    /// The cached static row, with the content digest prepared when the
    /// read requests one.
    pub fn static_row(&self, digest_requested: bool) -> Option<Row> {
        let mut row = self.state.read().static_row().cloned()?;
        if digest_requested {
            row.prepare_digest();
        }
        Some(row)
    }

    /// Merge a freshly observed static row into the cache.
    pub fn apply_static_row(&self, row: &Row) {
        self.state.write().apply_static_row(row);
    }

    pub fn set_static_row_continuous(&self) {
        self.state.write().set_static_row_continuous(true);
    }

    /// Insert an entry into the latest version unless the position is
    /// already present. Returns the entry id at the position and whether a
    /// new entry was inserted.
    pub fn insert_in_latest(&self, spec: NewEntry) -> Result<(EntryId, bool), AllocError> {
        self.region.try_alloc()?;
        let mut state = self.state.write();
        debug_assert_eq!(
            state.latest().id(),
            self.visible,
            "population against a non-latest snapshot"
        );
        if let Some(existing) = state.latest().entry(&spec.position) {
            return Ok((existing.id(), false));
        }
        let inherited = if spec.inherit_interval {
            state
                .latest()
                .strictly_after(&spec.position)
                .map(|e| (e.continuous(), e.range_tombstone()))
        } else {
            None
        };
        let id = self.tracker.next_entry_id();
        let mut entry = match spec.payload {
            Some(p) => RowEntry::row(id, spec.position, p),
            None => RowEntry::dummy(id, spec.position),
        };
        let (continuous, rt) = inherited.unwrap_or((spec.continuous, spec.range_tombstone));
        entry.set_continuous(continuous);
        entry.set_range_tombstone(rt);
        state.latest_mut().insert(entry);
        self.tracker.insert(id);
        Ok((id, true))
    }

    /// Flags of the latest-version entry at `position`, if any.
    pub fn entry_in_latest(&self, position: &Position) -> Option<EntryFlags> {
        let state = self.state.read();
        state.latest().entry(position).map(|e| EntryFlags {
            id: e.id(),
            dummy: e.is_dummy(),
            continuous: e.continuous(),
            range_tombstone: e.range_tombstone(),
        })
    }

    /// Mutate the latest-version entry at `position`. Returns false when
    /// absent.
    pub fn with_entry_in_latest_mut(
        &self,
        position: &Position,
        f: impl FnOnce(&mut RowEntry),
    ) -> bool {
        let mut state = self.state.write();
        match state.latest_mut().entry_mut(position) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    /// Remove the latest-version entry at `position` (dummy drop). The
    /// caller is responsible for holding the latest-and-oldest invariant
    /// and for invalidating references afterwards.
    pub fn remove_from_latest(&self, position: &Position) -> bool {
        let removed = {
            let mut state = self.state.write();
            state.latest_mut().remove(position)
        };
        match removed {
            Some(entry) => {
                tracing::trace!(?position, "removed entry from latest version");
                self.tracker.remove(entry.id());
                self.tracker.on_eviction();
                true
            }
            None => false,
        }
    }

    /// Locate an entry by exact table-domain position among the visible
    /// versions, newest first.
    pub fn find_entry(&self, position: &Position) -> Option<(VersionId, EntryId)> {
        let state = self.state.read();
        for version in state.visible(self.visible) {
            if let Some(entry) = version.entry(position) {
                return Some((version.id(), entry.id()));
            }
        }
        None
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&PartitionState) -> R) -> R {
        f(&self.state.read())
    }
}

/// A weak back-reference to a cache entry, resolved by position.
///
/// Holds no liveness over the entry: `refresh` re-locates it and fails when
/// eviction has removed it. The version/entry ids act as the generation
/// token; a promoted or re-inserted entry refreshes to new ids.
#[derive(Clone, Debug)]
pub struct RowWeakRef {
    position: Position, // table domain
    entry: EntryId,
    version: VersionId,
}

impl RowWeakRef {
    pub fn new(position: Position, entry: EntryId, version: VersionId) -> Self {
        RowWeakRef {
            position,
            entry,
            version,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn entry_id(&self) -> EntryId {
        self.entry
    }

    /// Re-locate the referenced entry. Returns false when it was evicted.
    pub fn refresh(&mut self, snapshot: &PartitionSnapshot) -> bool {
        match snapshot.find_entry(&self.position) {
            Some((version, entry)) => {
                self.version = version;
                self.entry = entry;
                true
            }
            None => false,
        }
    }

    /// True iff the entry this reference resolves to lives in the
    /// partition's latest version.
    pub fn is_in_latest(&self, snapshot: &PartitionSnapshot) -> bool {
        snapshot.with_state(|state| state.latest().id() == self.version)
    }

    /// Point this reference at a just-promoted latest-version entry.
    pub fn set_latest(&mut self, entry: EntryId, version: VersionId) {
        self.entry = entry;
        self.version = version;
    }
}
