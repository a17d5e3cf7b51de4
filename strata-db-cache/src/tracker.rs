//! Cache accounting: atomic counters, the entry LRU, and the `RowCache`
//! front with per-key population phases.

use crate::entry::EntryId;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use strata_db_core::DecoratedKey;

/// Lock-free counter block for the cache hot path.
#[derive(Debug, Default)]
pub struct TrackerCounters {
    pub row_hits: AtomicU64,
    pub row_misses: AtomicU64,
    pub mispopulations: AtomicU64,
    pub static_row_inserts: AtomicU64,
    pub dummy_row_hits: AtomicU64,
    pub row_tombstone_reads: AtomicU64,
    pub range_tombstone_reads: AtomicU64,
    pub partition_touches: AtomicU64,
    pub evictions: AtomicU64,
}

/// Plain snapshot of the counter block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    pub row_hits: u64,
    pub row_misses: u64,
    pub mispopulations: u64,
    pub static_row_inserts: u64,
    pub dummy_row_hits: u64,
    pub row_tombstone_reads: u64,
    pub range_tombstone_reads: u64,
    pub partition_touches: u64,
    pub evictions: u64,
}

/// Intrusive-order LRU over entry ids.
///
/// Pure memory bookkeeping; eviction *policy* lives with the cache owner,
/// the tracker only maintains recency order and membership.
#[derive(Debug, Default)]
struct Lru {
    // id -> (prev, next); None ends the chain.
    links: FxHashMap<u64, (Option<u64>, Option<u64>)>,
    // most recently used
    head: Option<u64>,
    // least recently used
    tail: Option<u64>,
}

impl Lru {
    fn unlink(&mut self, id: u64) -> bool {
        let Some((prev, next)) = self.links.remove(&id) else {
            return false;
        };
        match prev {
            Some(p) => {
                if let Some(link) = self.links.get_mut(&p) {
                    link.1 = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(link) = self.links.get_mut(&n) {
                    link.0 = prev;
                }
            }
            None => self.tail = prev,
        }
        true
    }

    fn push_front(&mut self, id: u64) {
        let old_head = self.head;
        if let Some(h) = old_head {
            if let Some(link) = self.links.get_mut(&h) {
                link.0 = Some(id);
            }
        }
        self.links.insert(id, (None, old_head));
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
    }

    fn len(&self) -> usize {
        self.links.len()
    }
}

/// Counters plus the entry LRU for one cache.
#[derive(Debug, Default)]
pub struct CacheTracker {
    counters: TrackerCounters,
    lru: Mutex<Lru>,
    next_entry_id: AtomicU64,
}

impl CacheTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(CacheTracker::default())
    }

    /// Allocate a fresh entry id.
    pub fn next_entry_id(&self) -> EntryId {
        EntryId(self.next_entry_id.fetch_add(1, Relaxed))
    }

    /// Register a newly inserted entry as most recently used.
    pub fn insert(&self, id: EntryId) {
        let mut lru = self.lru.lock();
        lru.unlink(id.0);
        lru.push_front(id.0);
    }

    /// Move an entry to the most-recently-used position.
    pub fn touch_entry(&self, id: EntryId) {
        let mut lru = self.lru.lock();
        if lru.unlink(id.0) {
            lru.push_front(id.0);
        }
    }

    /// Remove an entry from the LRU (eviction or dummy drop).
    pub fn remove(&self, id: EntryId) {
        self.lru.lock().unlink(id.0);
    }

    /// The id of the least-recently-used tracked entry, if any.
    pub fn coldest(&self) -> Option<EntryId> {
        self.lru.lock().tail.map(EntryId)
    }

    pub fn tracked_entries(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn on_dummy_row_hit(&self) {
        self.counters.dummy_row_hits.fetch_add(1, Relaxed);
    }

    pub fn on_row_tombstone_read(&self) {
        self.counters.row_tombstone_reads.fetch_add(1, Relaxed);
    }

    pub fn on_range_tombstone_read(&self) {
        self.counters.range_tombstone_reads.fetch_add(1, Relaxed);
    }

    pub fn on_partition_touch(&self) {
        self.counters.partition_touches.fetch_add(1, Relaxed);
    }

    pub fn on_eviction(&self) {
        self.counters.evictions.fetch_add(1, Relaxed);
    }

    pub(crate) fn on_row_hit(&self) {
        self.counters.row_hits.fetch_add(1, Relaxed);
    }

    pub(crate) fn on_row_miss(&self) {
        self.counters.row_misses.fetch_add(1, Relaxed);
    }

    pub(crate) fn on_mispopulate(&self) {
        self.counters.mispopulations.fetch_add(1, Relaxed);
    }

    pub(crate) fn on_static_row_insert(&self) {
        self.counters.static_row_inserts.fetch_add(1, Relaxed);
    }

    /// Snapshot the counter block.
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            row_hits: self.counters.row_hits.load(Relaxed),
            row_misses: self.counters.row_misses.load(Relaxed),
            mispopulations: self.counters.mispopulations.load(Relaxed),
            static_row_inserts: self.counters.static_row_inserts.load(Relaxed),
            dummy_row_hits: self.counters.dummy_row_hits.load(Relaxed),
            row_tombstone_reads: self.counters.row_tombstone_reads.load(Relaxed),
            range_tombstone_reads: self.counters.range_tombstone_reads.load(Relaxed),
            partition_touches: self.counters.partition_touches.load(Relaxed),
            evictions: self.counters.evictions.load(Relaxed),
        }
    }
}

/// The row-cache front: hit/miss accounting plus per-key population phases.
///
/// A key's *phase* advances whenever cached state for the key is dropped
/// wholesale (for example on invalidation). A read context captures the
/// phase at construction; populations are only legal while the phases still
/// match, otherwise they are counted as mispopulations.
#[derive(Debug)]
pub struct RowCache {
    tracker: Arc<CacheTracker>,
    phases: RwLock<FxHashMap<DecoratedKey, u64>>,
}

impl RowCache {
    pub fn new(tracker: Arc<CacheTracker>) -> Arc<Self> {
        Arc::new(RowCache {
            tracker,
            phases: RwLock::new(FxHashMap::default()),
        })
    }

    pub fn tracker(&self) -> &Arc<CacheTracker> {
        &self.tracker
    }

    /// The current population phase for `key`.
    pub fn phase_of(&self, key: &DecoratedKey) -> u64 {
        self.phases.read().get(key).copied().unwrap_or(0)
    }

    /// Advance the population phase for `key`, making populations from
    /// contexts created before the bump illegal.
    pub fn bump_phase(&self, key: &DecoratedKey) {
        *self.phases.write().entry(key.clone()).or_insert(0) += 1;
    }

    pub fn on_row_hit(&self) {
        self.tracker.on_row_hit();
    }

    pub fn on_row_miss(&self) {
        self.tracker.on_row_miss();
    }

    pub fn on_mispopulate(&self) {
        self.tracker.on_mispopulate();
    }

    pub fn on_static_row_insert(&self) {
        self.tracker.on_static_row_insert();
    }
}
