//! Cross-cutting reader properties: idempotence, equivalence between cold
//! and warm reads, close safety, population gating, and error contracts.

mod common;

use common::*;
use futures::TryStreamExt;
use strata_db_core::{
    ClusteringRange, Error, FilterRanges, Fragment, Position, PositionRange, Tombstone,
};
use strata_db_reader::{MemoryPartition, MemorySource, ReadContextHolder};

fn mixed_partition() -> MemoryPartition {
    let t = Tombstone::new(20, 200);
    MemoryPartition::new()
        .with_row(row("a", 1))
        .with_row(row("c", 3))
        .with_row(row("e", 5))
        .with_range_tombstone(Position::after_key("a"), Position::before_key("e"), t)
}

/// Rows and tombstone changes only; start/end and exact change coalescing
/// are allowed to differ between sources.
fn content(frags: &[Fragment]) -> Vec<Fragment> {
    frags
        .iter()
        .filter(|f| f.is_clustering_row() || f.is_range_tombstone_change())
        .cloned()
        .collect()
}

#[tokio::test]
async fn cold_and_warm_reads_emit_identical_streams() {
    let fx = Fixture::simple();
    let ranges = FilterRanges::full();

    let cold = read_all(fx.reader(MemorySource::new(mixed_partition()), ranges.clone())).await;
    assert_stream_invariants(&cold, false);

    let warm = read_all(fx.reader(MemorySource::new(mixed_partition()), ranges.clone())).await;
    assert_stream_invariants(&warm, false);
    assert_eq!(content(&cold), content(&warm));

    // and a third time, to cover dummy-drop effects
    let again = read_all(fx.reader(MemorySource::new(mixed_partition()), ranges)).await;
    assert_eq!(content(&cold), content(&again));
}

#[tokio::test]
async fn warm_read_does_not_touch_underlying() {
    let fx = Fixture::simple();
    let _ = read_all(fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full())).await;
    let misses = fx.stats().row_misses;
    let _ = read_all(fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full())).await;
    assert_eq!(fx.stats().row_misses, misses);
}

#[tokio::test]
async fn restricted_filter_is_a_subsequence_of_the_full_stream() {
    let fx = Fixture::simple();
    let full = read_all(fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full())).await;
    let full_keys = row_keys(&full);

    let fx2 = Fixture::simple();
    let ranges = FilterRanges::new(vec![ClusteringRange::between("b", true, "e", true)]);
    let restricted =
        read_all(fx2.reader(MemorySource::new(mixed_partition()), ranges)).await;
    assert_stream_invariants(&restricted, false);
    let restricted_keys = row_keys(&restricted);

    assert_eq!(restricted_keys, keys(&["c", "e"]));
    assert!(restricted_keys.iter().all(|k| full_keys.contains(k)));
}

#[tokio::test]
async fn close_is_idempotent_and_blocks_further_reads() {
    let fx = Fixture::simple();
    let mut reader = fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full());
    reader.fill_buffer().await.unwrap();

    reader.close().await.unwrap();
    reader.close().await.unwrap();
    assert!(matches!(
        reader.fill_buffer().await,
        Err(Error::ReaderClosed)
    ));
}

#[tokio::test]
async fn position_range_fast_forward_is_a_programmer_error() {
    let fx = Fixture::simple();
    let mut reader = fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full());
    let err = reader
        .fast_forward_to(PositionRange::full())
        .expect_err("position-range fast-forward must fail");
    assert!(matches!(err, Error::Unsupported(_)));
    // the reader remains usable and closeable
    reader.fill_buffer().await.unwrap();
    reader.close().await.unwrap();
}

#[tokio::test]
async fn next_partition_drains_to_end_of_stream() {
    let fx = Fixture::simple();
    let mut reader = fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full());
    reader.fill_buffer().await.unwrap();
    reader.next_partition();
    assert!(reader.is_end_of_stream());
    assert!(reader.next_fragment().await.unwrap().is_none());
    reader.close().await.unwrap();
}

#[tokio::test]
async fn phase_mismatch_counts_mispopulations_and_keeps_cache_clean() {
    let fx = Fixture::simple();
    let ctx = fx.context(MemorySource::new(mixed_partition()));
    // the cache drops the partition's phase after the context captured it
    fx.cache.bump_phase(&dk());
    let reader = fx.reader_from_context(ctx, FilterRanges::full());
    let frags = read_all(reader).await;

    assert_stream_invariants(&frags, false);
    assert_eq!(row_keys(&frags), keys(&["a", "c", "e"]));
    assert!(fx.stats().mispopulations > 0);

    // nothing was populated: the next read still misses
    let misses = fx.stats().row_misses;
    let ctx = fx.context(MemorySource::new(mixed_partition()));
    fx.cache.bump_phase(&dk());
    let reader = fx.reader_from_context(ctx, FilterRanges::full());
    let _ = read_all(reader).await;
    assert!(fx.stats().row_misses > misses);
}

#[tokio::test]
async fn allocation_failures_do_not_affect_emitted_data() {
    let fx = Fixture::simple();
    // every population attempt fails
    fx.partition.region().fail_next_allocations(1_000);
    let frags = read_all(fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full())).await;
    assert_stream_invariants(&frags, false);
    assert_eq!(row_keys(&frags), keys(&["a", "c", "e"]));

    // nothing stuck in cache: the next read misses again
    let misses = fx.stats().row_misses;
    let _ = read_all(fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full())).await;
    assert!(fx.stats().row_misses > misses);
}

#[tokio::test]
async fn borrowed_context_is_not_closed_by_the_reader() {
    let fx = Fixture::simple();
    let mut ctx = fx.context(MemorySource::new(mixed_partition()));
    {
        let mut reader = strata_db_reader::CachePartitionReader::new(
            fx.partition.schema().clone(),
            dk(),
            FilterRanges::full(),
            ReadContextHolder::Borrowed(&mut ctx),
            fx.partition.snapshot(),
        );
        while let Some(_f) = reader.next_fragment().await.unwrap() {}
        reader.close().await.unwrap();
    }
    // the borrowed context survives the reader and is closed by its owner
    assert!(!ctx.is_closed());
    ctx.close().await.unwrap();
    assert!(ctx.is_closed());
}

#[tokio::test]
async fn stream_adapter_yields_the_same_fragments() {
    let fx = Fixture::simple();
    let direct = read_all(fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full())).await;

    let fx2 = Fixture::simple();
    let reader = fx2.reader(MemorySource::new(mixed_partition()), FilterRanges::full());
    let streamed: Vec<Fragment> = reader.into_stream().try_collect().await.unwrap();

    assert_eq!(content(&direct), content(&streamed));
    assert_eq!(streamed.len(), direct.len());
}

#[tokio::test]
async fn snapshot_taken_before_new_version_never_populates() {
    let fx = Fixture::simple();
    let snapshot = fx.partition.snapshot();
    // a write arrives: the chain grows and the snapshot is no longer latest
    fx.partition.add_version();
    assert!(!snapshot.at_latest_version());

    let ctx = fx.context(MemorySource::new(mixed_partition()));
    let reader = strata_db_reader::CachePartitionReader::new(
        fx.partition.schema().clone(),
        dk(),
        FilterRanges::full(),
        ReadContextHolder::Owned(Box::new(ctx)),
        snapshot,
    );
    let frags = read_all(reader).await;
    assert_stream_invariants(&frags, false);
    assert_eq!(row_keys(&frags), keys(&["a", "c", "e"]));
    assert!(fx.stats().mispopulations > 0);
}

#[tokio::test]
async fn tracker_counts_tombstone_reads() {
    let fx = Fixture::simple();
    let _ = read_all(fx.reader(MemorySource::new(mixed_partition()), FilterRanges::full())).await;
    assert!(fx.stats().range_tombstone_reads > 0);
}
