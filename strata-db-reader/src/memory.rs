//! An in-memory underlying source.
//!
//! `MemorySource` serves a single partition held in memory, emitting the
//! fragment protocol the reader expects from the authoritative source: the
//! static row first, then per-slice clustering rows interleaved with
//! range-tombstone changes in query order, with an opening change at the
//! slice start when a tombstone covers it and a closing change at the slice
//! end while one is active.
//!
//! Used by the integration tests and by embedders that keep the
//! authoritative copy in memory.

use crate::context::UnderlyingSource;
use crate::underlying::FragmentSource;
use async_trait::async_trait;
use std::collections::VecDeque;
use strata_db_core::{
    ClusteringRow, DecoratedKey, DomainCmp, Fragment, Position, PositionRange,
    RangeTombstoneChange, Result, Row, Tombstone,
};

/// One range tombstone of the stored partition, bounds in table order.
///
/// Bounds must be non-row positions (`before`/`after` weights or the
/// partition extremes).
#[derive(Clone, Debug)]
pub struct TombstoneSpan {
    pub start: Position,
    pub end: Position,
    pub tombstone: Tombstone,
}

/// The authoritative content of one partition.
#[derive(Clone, Debug, Default)]
pub struct MemoryPartition {
    static_row: Option<Row>,
    rows: Vec<ClusteringRow>,
    spans: Vec<TombstoneSpan>,
}

impl MemoryPartition {
    pub fn new() -> Self {
        MemoryPartition::default()
    }

    pub fn with_static_row(mut self, row: Row) -> Self {
        self.static_row = Some(row);
        self
    }

    /// Add a row; rows must be added in table order.
    pub fn with_row(mut self, row: ClusteringRow) -> Self {
        debug_assert!(
            self.rows
                .last()
                .map(|prev| prev.key < row.key)
                .unwrap_or(true),
            "rows must be added in table order"
        );
        self.rows.push(row);
        self
    }

    /// Add a range tombstone; spans must be non-overlapping, in table
    /// order, with non-row bounds.
    pub fn with_range_tombstone(
        mut self,
        start: Position,
        end: Position,
        tombstone: Tombstone,
    ) -> Self {
        debug_assert!(!start.is_clustering_row() && !end.is_clustering_row());
        self.spans.push(TombstoneSpan {
            start,
            end,
            tombstone,
        });
        self
    }

    pub fn rows(&self) -> &[ClusteringRow] {
        &self.rows
    }
}

/// In-memory [`UnderlyingSource`] for one partition.
pub struct MemorySource {
    partition: Option<MemoryPartition>,
}

impl MemorySource {
    pub fn new(partition: MemoryPartition) -> Box<Self> {
        Box::new(MemorySource {
            partition: Some(partition),
        })
    }

    /// A source for a partition absent from the authoritative store.
    pub fn absent() -> Box<Self> {
        Box::new(MemorySource { partition: None })
    }
}

#[async_trait]
impl UnderlyingSource for MemorySource {
    fn partition_exists(&self) -> bool {
        self.partition.is_some()
    }

    async fn open(
        &mut self,
        _key: &DecoratedKey,
        reversed: bool,
    ) -> Result<Box<dyn FragmentSource>> {
        let cmp = DomainCmp::new(reversed);
        match &self.partition {
            None => Ok(Box::new(MemoryFragmentSource {
                cmp,
                static_pending: None,
                rows: Vec::new(),
                spans: Vec::new(),
                pending: VecDeque::new(),
            })),
            Some(p) => {
                let mut rows = p.rows.clone();
                if reversed {
                    rows.reverse();
                }
                let mut spans: Vec<(Position, Position, Tombstone)> = p
                    .spans
                    .iter()
                    .map(|s| {
                        if reversed {
                            // table [start, end) becomes query [rev(end), rev(start))
                            (s.end.reversed(), s.start.reversed(), s.tombstone)
                        } else {
                            (s.start.clone(), s.end.clone(), s.tombstone)
                        }
                    })
                    .collect();
                spans.sort_by(|a, b| cmp.cmp(&a.0, &b.0));
                Ok(Box::new(MemoryFragmentSource {
                    cmp,
                    static_pending: Some(p.static_row.clone().unwrap_or_default()),
                    rows,
                    spans,
                    pending: VecDeque::new(),
                }))
            }
        }
    }
}

/// The opened stream over a [`MemorySource`] partition, in query domain.
struct MemoryFragmentSource {
    cmp: DomainCmp,
    static_pending: Option<Row>,
    rows: Vec<ClusteringRow>,
    spans: Vec<(Position, Position, Tombstone)>,
    pending: VecDeque<Fragment>,
}

impl MemoryFragmentSource {
    fn max_q(&self, a: &Position, b: &Position) -> Position {
        if self.cmp.lt(a, b) {
            b.clone()
        } else {
            a.clone()
        }
    }

    fn min_q(&self, a: &Position, b: &Position) -> Position {
        if self.cmp.lt(a, b) {
            a.clone()
        } else {
            b.clone()
        }
    }

    fn build_slice(&mut self, range: &PositionRange) {
        self.pending.clear();
        let mut changes: Vec<RangeTombstoneChange> = Vec::new();
        for (start, end, tombstone) in &self.spans {
            let s = self.max_q(start, &range.start);
            let e = self.min_q(end, &range.end);
            if !self.cmp.lt(&s, &e) {
                continue;
            }
            // back-to-back spans collapse into a single change
            let coalesce = matches!(
                changes.last(),
                Some(last) if last.is_closing() && self.cmp.eq(&last.position, &s)
            );
            if coalesce {
                changes.pop();
            }
            changes.push(RangeTombstoneChange::new(s, *tombstone));
            changes.push(RangeTombstoneChange::new(e, Tombstone::NONE));
        }

        let rows: Vec<&ClusteringRow> = self
            .rows
            .iter()
            .filter(|r| {
                let p = r.position();
                !self.cmp.lt(&p, &range.start) && self.cmp.lt(&p, &range.end)
            })
            .collect();

        // merge the two query-sorted lists; changes sort before rows at
        // equal positions (cannot collide given non-row span bounds)
        let mut ci = changes.into_iter().peekable();
        let mut ri = rows.into_iter().peekable();
        loop {
            match (ci.peek(), ri.peek()) {
                (Some(c), Some(r)) => {
                    if self.cmp.lt(&r.position(), &c.position) {
                        let row = ri.next().map(|r| r.clone());
                        if let Some(row) = row {
                            self.pending.push_back(Fragment::ClusteringRow(row));
                        }
                    } else if let Some(c) = ci.next() {
                        self.pending.push_back(Fragment::RangeTombstoneChange(c));
                    }
                }
                (Some(_), None) => {
                    if let Some(c) = ci.next() {
                        self.pending.push_back(Fragment::RangeTombstoneChange(c));
                    }
                }
                (None, Some(_)) => {
                    if let Some(r) = ri.next() {
                        self.pending.push_back(Fragment::ClusteringRow(r.clone()));
                    }
                }
                (None, None) => break,
            }
        }
    }
}

#[async_trait]
impl FragmentSource for MemoryFragmentSource {
    async fn fast_forward_to(&mut self, range: PositionRange) -> Result<()> {
        self.static_pending = None;
        self.build_slice(&range);
        Ok(())
    }

    async fn next_fragment(&mut self) -> Result<Option<Fragment>> {
        if let Some(row) = self.static_pending.take() {
            return Ok(Some(Fragment::StaticRow { row }));
        }
        Ok(self.pending.pop_front())
    }
}
