//! Population mechanics: continuity stitching, tombstone shielding, and
//! redundant-dummy dropping.

mod common;

use common::*;
use strata_db_core::{ClusteringRange, FilterRanges, Position, Tombstone};
use strata_db_reader::{MemoryPartition, MemorySource};

#[tokio::test]
async fn population_marks_read_interval_continuous() {
    let fx = Fixture::simple();
    let underlying = MemoryPartition::new().with_row(row("b", 2));
    let ranges = FilterRanges::new(vec![ClusteringRange::between("a", true, "c", true)]);
    let _ = read_all(fx.reader(MemorySource::new(underlying), ranges)).await;

    let snap = fx.partition.snapshot();
    // boundary dummies anchor the interval
    assert!(snap
        .entry_in_latest(&Position::before_key("a"))
        .map(|f| f.dummy)
        .unwrap_or(false));
    let row_flags = snap.entry_in_latest(&Position::at_key("b")).unwrap();
    assert!(!row_flags.dummy);
    assert!(row_flags.continuous);
    let end_flags = snap.entry_in_latest(&Position::after_key("c")).unwrap();
    assert!(end_flags.dummy);
    assert!(end_flags.continuous);
}

#[tokio::test]
async fn differing_row_tombstone_is_shielded_with_dummy() {
    let fx = Fixture::simple();
    let v = fx.partition.latest_version_id();
    let c = row("c", 3);
    // cached row with no tombstone knowledge, not continuous
    fx.partition.seed_entry(
        v,
        Position::at_key("c"),
        Some(payload_of(&c)),
        false,
        Tombstone::NONE,
    );
    // underlying covers everything before c with a tombstone
    let t = Tombstone::new(6, 60);
    let underlying = MemoryPartition::new()
        .with_row(row("c", 3))
        .with_range_tombstone(Position::before_key("a"), Position::before_key("c"), t);
    let ranges = FilterRanges::new(vec![ClusteringRange::between("a", true, "d", false)]);

    let frags = read_all(fx.reader(MemorySource::new(underlying.clone()), ranges.clone())).await;
    assert_stream_invariants(&frags, false);
    assert_eq!(
        rtcs(&frags),
        vec![
            (Position::before_key("a"), t),
            (Position::before_key("c"), Tombstone::NONE),
        ]
    );
    assert_eq!(row_keys(&frags), keys(&["c"]));

    // the interval tombstone lives on a shield dummy; the row entry keeps
    // its own tombstone and both are continuous
    let snap = fx.partition.snapshot();
    let shield = snap.entry_in_latest(&Position::before_key("c")).unwrap();
    assert!(shield.dummy);
    assert!(shield.continuous);
    assert_eq!(shield.range_tombstone, t);
    let row_flags = snap.entry_in_latest(&Position::at_key("c")).unwrap();
    assert!(row_flags.continuous);
    assert_eq!(row_flags.range_tombstone, Tombstone::NONE);

    // warm read reproduces the stream exactly
    let warm = read_all(fx.reader(MemorySource::new(underlying), ranges)).await;
    assert_eq!(rtcs(&warm), rtcs(&frags));
    assert_eq!(row_keys(&warm), row_keys(&frags));
}

#[tokio::test]
async fn redundant_dummy_inside_continuous_interval_is_dropped() {
    let fx = Fixture::simple();
    let v = fx.partition.latest_version_id();
    for (key, ts) in [("a", 1), ("b", 2)] {
        let r = row(key, ts);
        fx.partition.seed_entry(
            v,
            Position::at_key(key),
            Some(payload_of(&r)),
            true,
            Tombstone::NONE,
        );
    }
    // a leftover dummy splitting the continuous run between a and b
    fx.partition
        .seed_entry(v, Position::after_key("a"), None, true, Tombstone::NONE);
    fx.partition
        .seed_entry(v, Position::after_all_rows(), None, true, Tombstone::NONE);

    let frags = read_all(fx.reader(MemorySource::absent(), FilterRanges::full())).await;
    assert_stream_invariants(&frags, false);
    assert_eq!(row_keys(&frags), keys(&["a", "b"]));

    // the dummy was dropped without changing logical contents
    let snap = fx.partition.snapshot();
    assert!(snap.entry_in_latest(&Position::after_key("a")).is_none());
    assert_eq!(fx.stats().evictions, 1);

    // and the re-read is identical
    let again = read_all(fx.reader(MemorySource::absent(), FilterRanges::full())).await;
    assert_eq!(row_keys(&again), keys(&["a", "b"]));
    assert_eq!(fx.stats().row_misses, 0);
}

#[tokio::test]
async fn dummies_anchoring_tombstone_boundaries_are_kept() {
    let fx = Fixture::simple();
    let v = fx.partition.latest_version_id();
    let t = Tombstone::new(8, 80);
    // a tombstone over (before(a), after(a)]: both boundary dummies carry
    // tombstone information and must survive the read
    fx.partition
        .seed_entry(v, Position::before_key("a"), None, true, Tombstone::NONE);
    let a = row("a", 1);
    fx.partition
        .seed_entry(v, Position::at_key("a"), Some(payload_of(&a)), true, t);
    fx.partition
        .seed_entry(v, Position::after_key("a"), None, true, t);
    let b = row("b", 2);
    fx.partition.seed_entry(
        v,
        Position::at_key("b"),
        Some(payload_of(&b)),
        true,
        Tombstone::NONE,
    );
    fx.partition
        .seed_entry(v, Position::after_all_rows(), None, true, Tombstone::NONE);

    let frags = read_all(fx.reader(MemorySource::absent(), FilterRanges::full())).await;
    assert_stream_invariants(&frags, false);
    assert_eq!(row_keys(&frags), keys(&["a", "b"]));
    assert_eq!(
        rtcs(&frags),
        vec![
            (Position::before_key("a"), t),
            (Position::after_key("a"), Tombstone::NONE),
        ]
    );

    let snap = fx.partition.snapshot();
    assert!(snap.entry_in_latest(&Position::before_key("a")).is_some());
    assert!(snap.entry_in_latest(&Position::after_key("a")).is_some());
    assert_eq!(fx.stats().evictions, 0);
}
