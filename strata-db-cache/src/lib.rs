//! # strata-db-cache
//!
//! The evictable row-entry store: versioned partitions, refcounted
//! snapshots, the merged snapshot cursor, and cache accounting.
//!
//! Reads merge the version chain newest-to-oldest; populations target the
//! latest version only, eviction the oldest only. Continuity is tracked per
//! entry: a `continuous` entry asserts the interval from its predecessor is
//! row-free and covered by the entry's range tombstone. The arena `Region`
//! provides generation-based reference invalidation; cursors re-seek
//! instead of caching raw iterators.

pub mod cursor;
pub mod entry;
pub mod region;
pub mod snapshot;
pub mod tracker;
pub mod version;

pub use cursor::{EnsureLatest, SnapshotRowCursor};
pub use entry::{EntryId, RowEntry, RowPayload, VersionId};
pub use region::{AllocError, Region};
pub use snapshot::{EntryFlags, NewEntry, Partition, PartitionSnapshot, RowWeakRef, SnapshotHandle};
pub use tracker::{CacheTracker, RowCache, TrackerStats};
pub use version::{IntervalAttrs, MergedEntry, PartitionState, PartitionVersion};
