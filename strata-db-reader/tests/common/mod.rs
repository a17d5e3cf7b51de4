//! Shared fixtures for the reader integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use strata_db_cache::{CacheTracker, Partition, RowCache, RowPayload, TrackerStats};
use strata_db_core::{
    ClusteringKey, ClusteringRow, ColumnId, DecoratedKey, DomainCmp, FilterRanges, Fragment,
    Position, Row, Schema, Tombstone,
};
use strata_db_reader::{
    CachePartitionReader, ReadContext, ReadContextHolder, ReadPermit, UnderlyingSource,
};

pub fn dk() -> DecoratedKey {
    DecoratedKey::new(42, b"pk".to_vec())
}

pub fn row(key: &str, ts: i64) -> ClusteringRow {
    ClusteringRow::new(
        key,
        Tombstone::NONE,
        Row::from_cells([(ColumnId(0), ts, format!("v{ts}").into_bytes())]),
    )
}

pub fn payload_of(cr: &ClusteringRow) -> RowPayload {
    RowPayload {
        tombstone: cr.tombstone,
        row: cr.row.clone(),
    }
}

/// A cache partition plus its row-cache front.
pub struct Fixture {
    pub partition: Partition,
    pub cache: Arc<RowCache>,
}

impl Fixture {
    pub fn new(schema: Arc<Schema>) -> Self {
        let tracker = CacheTracker::new();
        let cache = RowCache::new(tracker.clone());
        let partition = Partition::new(schema, dk(), tracker);
        Fixture { partition, cache }
    }

    pub fn simple() -> Self {
        Fixture::new(Schema::simple("items", 1))
    }

    pub fn stats(&self) -> TrackerStats {
        self.cache.tracker().stats()
    }

    pub fn context(&self, source: Box<dyn UnderlyingSource>) -> ReadContext {
        ReadContext::new(self.cache.clone(), dk(), source)
    }

    pub fn reader(
        &self,
        source: Box<dyn UnderlyingSource>,
        ranges: FilterRanges,
    ) -> CachePartitionReader<'static> {
        self.reader_from_context(self.context(source), ranges)
    }

    pub fn reversed_reader(
        &self,
        source: Box<dyn UnderlyingSource>,
        ranges: FilterRanges,
    ) -> CachePartitionReader<'static> {
        self.reader_from_context(self.context(source).reversed(), ranges)
    }

    pub fn small_buffer_reader(
        &self,
        source: Box<dyn UnderlyingSource>,
        ranges: FilterRanges,
        capacity: usize,
    ) -> CachePartitionReader<'static> {
        let ctx = self
            .context(source)
            .with_permit(ReadPermit::default().with_max_buffered(capacity));
        self.reader_from_context(ctx, ranges)
    }

    pub fn reader_from_context(
        &self,
        ctx: ReadContext,
        ranges: FilterRanges,
    ) -> CachePartitionReader<'static> {
        CachePartitionReader::new(
            self.partition.schema().clone(),
            dk(),
            ranges,
            ReadContextHolder::Owned(Box::new(ctx)),
            self.partition.snapshot(),
        )
    }
}

/// Drain a reader to completion and close it.
pub async fn read_all(mut reader: CachePartitionReader<'static>) -> Vec<Fragment> {
    let mut out = Vec::new();
    while let Some(f) = reader.next_fragment().await.expect("read failed") {
        out.push(f);
    }
    reader.close().await.expect("close failed");
    out
}

/// The clustering keys of the emitted rows, in stream order.
pub fn row_keys(fragments: &[Fragment]) -> Vec<ClusteringKey> {
    fragments
        .iter()
        .filter_map(|f| match f {
            Fragment::ClusteringRow(cr) => Some(cr.key.clone()),
            _ => None,
        })
        .collect()
}

pub fn keys(names: &[&str]) -> Vec<ClusteringKey> {
    names.iter().map(|n| ClusteringKey::from(*n)).collect()
}

/// The range-tombstone changes of the stream, in order.
pub fn rtcs(fragments: &[Fragment]) -> Vec<(Position, Tombstone)> {
    fragments
        .iter()
        .filter_map(|f| match f {
            Fragment::RangeTombstoneChange(rtc) => Some((rtc.position.clone(), rtc.tombstone)),
            _ => None,
        })
        .collect()
}

/// Assert the stream invariants:
/// - exactly one partition-start first and one partition-end last
/// - fragment positions monotonic in query order, rows strictly so
/// - every opening range-tombstone change eventually closed (balanced),
///   with at most one tombstone active at a time by construction
pub fn assert_stream_invariants(fragments: &[Fragment], reversed: bool) {
    assert!(
        matches!(fragments.first(), Some(Fragment::PartitionStart { .. })),
        "stream must begin with partition-start"
    );
    assert!(
        matches!(fragments.last(), Some(Fragment::PartitionEnd)),
        "stream must end with partition-end"
    );
    assert_eq!(
        fragments
            .iter()
            .filter(|f| matches!(f, Fragment::PartitionStart { .. } | Fragment::PartitionEnd))
            .count(),
        2,
        "exactly one start and one end"
    );

    let cmp = DomainCmp::new(reversed);
    let mut prev: Option<Position> = None;
    let mut active = Tombstone::NONE;
    for fragment in fragments {
        match fragment {
            Fragment::ClusteringRow(cr) => {
                let pos = cr.position();
                if let Some(p) = &prev {
                    assert!(
                        cmp.lt(p, &pos),
                        "row position {pos:?} must strictly follow {p:?}"
                    );
                }
                prev = Some(pos);
            }
            Fragment::RangeTombstoneChange(rtc) => {
                if let Some(p) = &prev {
                    assert!(
                        !cmp.lt(&rtc.position, p),
                        "rtc position {:?} must not precede {:?}",
                        rtc.position,
                        p
                    );
                }
                prev = Some(rtc.position.clone());
                active = rtc.tombstone;
            }
            _ => {}
        }
    }
    assert!(
        active.is_none(),
        "an opened range tombstone must be closed before partition end"
    );
}
