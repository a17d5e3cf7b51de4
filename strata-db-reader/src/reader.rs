//! The cache-coherent partition reader.
//!
//! A per-partition streaming reader that merges the cached clustered state
//! (through a snapshot cursor) with the authoritative underlying source,
//! emits an ordered fragment stream, and populates the cache with the rows
//! and range-tombstone boundaries it observes, preserving interval
//! continuity across snapshot versions.
//!
//! State machine:
//! - `BeforeStaticRow`: initial; the partition-start fragment is buffered
//!   at construction.
//! - `ReadingFromCache`: the snapshot cursor is the source. Invariant:
//!   `[lower_bound, upper_bound)` covers every not-yet-emitted position of
//!   the current filter range, and when the cursor is valid it sits at the
//!   nearest cache entry at or after `lower_bound`.
//! - `MoveToUnderlying`: pending switch to the underlying source for
//!   `[lower_bound, min(next_row.position, upper_bound))`.
//! - `ReadingFromUnderlying`: draining the fast-forwarded slice, with
//!   `underlying_upper_bound` as the exclusive cap and `last_row` anchoring
//!   continuity population.
//! - `EndOfStream`: terminal; the partition-end fragment has been emitted.
//!
//! Correctness of the emitted stream never depends on population success:
//! allocation failures and eviction-induced anchor losses are swallowed,
//! counted, and the read continues from the underlying source.

use crate::buffer::FragmentBuffer;
use crate::context::{ReadContext, ReadContextHolder, ReadPermit};
use futures::Stream;
use std::sync::Arc;
use strata_db_cache::{
    AllocError, NewEntry, RowPayload, RowWeakRef, SnapshotHandle, SnapshotRowCursor,
};
use strata_db_core::{
    ClusteringRow, DecoratedKey, DomainCmp, Error, FilterRanges, Fragment, Position,
    PositionRange, RangeTombstoneChange, Result, Row, Schema, Tombstone,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ReaderState {
    BeforeStaticRow,
    ReadingFromCache,
    MoveToUnderlying,
    ReadingFromUnderlying,
    EndOfStream,
}

/// The per-partition cache-coherent reader.
pub struct CachePartitionReader<'a> {
    schema: Arc<Schema>,
    snapshot: SnapshotHandle,
    ranges: FilterRanges,
    range_idx: usize,
    ctx: ReadContextHolder<'a>,
    next_row: SnapshotRowCursor,
    /// Anchor entry for continuity stitching; may be lost to eviction at
    /// any suspension point.
    last_row: Option<RowWeakRef>,
    /// Lower bound of the not-yet-emitted position range. Rows strictly
    /// below have been emitted, range-tombstone changes at or below.
    /// Never a clustering-row position.
    lower_bound: Position, // query domain
    /// Exclusive end of the current filter range. Never a clustering-row
    /// position.
    upper_bound: Position, // query domain
    /// Exclusive cap of the slice being drained from the underlying source.
    underlying_upper_bound: Option<Position>, // query domain
    /// The range tombstone active in the output stream at `lower_bound`.
    current_tombstone: Tombstone,
    state: ReaderState,
    next_row_in_range: bool,
    /// Whether any range-tombstone change sourced from the underlying
    /// reader has been emitted in this partition.
    has_rt: bool,
    /// Whether the current population interval starts before all clustered
    /// rows. Tracked separately from `lower_bound` because emission moves
    /// the bound while the population interval stays anchored.
    /// Meaningful while reading from the underlying source; forward reads
    /// only.
    population_range_starts_before_all_rows: bool,
    cmp: DomainCmp,
    permit: ReadPermit,
    buffer: FragmentBuffer,
    end_of_stream: bool,
    closed: bool,
}

impl<'a> CachePartitionReader<'a> {
    pub fn new(
        schema: Arc<Schema>,
        key: DecoratedKey,
        ranges: FilterRanges,
        ctx: ReadContextHolder<'a>,
        snapshot: SnapshotHandle,
    ) -> Self {
        let reversed = ctx.get().is_reversed();
        let permit = ctx.get().permit();
        let mut buffer = FragmentBuffer::new(permit.max_buffered_fragments);
        buffer.push(Fragment::PartitionStart {
            key,
            tombstone: snapshot.partition_tombstone(),
        });
        let next_row = SnapshotRowCursor::new(snapshot.clone(), reversed);
        tracing::trace!(
            table = %schema.table(),
            reversed,
            snapshot_version = ?snapshot.version(),
            "cache partition reader created"
        );
        CachePartitionReader {
            schema,
            snapshot,
            ranges,
            range_idx: 0,
            ctx,
            next_row,
            last_row: None,
            lower_bound: Position::before_all_rows(),
            upper_bound: Position::before_all_rows(),
            underlying_upper_bound: None,
            current_tombstone: Tombstone::NONE,
            state: ReaderState::BeforeStaticRow,
            next_row_in_range: false,
            has_rt: false,
            population_range_starts_before_all_rows: false,
            cmp: DomainCmp::new(reversed),
            permit,
            buffer,
            end_of_stream: false,
            closed: false,
        }
    }

    fn ctx(&self) -> &ReadContext {
        self.ctx.get()
    }

    fn ctx_mut(&mut self) -> &mut ReadContext {
        self.ctx.get_mut()
    }

    /// Whether the stream is complete and fully drained.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream && self.buffer.is_empty()
    }

    /// Take one buffered fragment without filling.
    pub fn pop_fragment(&mut self) -> Option<Fragment> {
        self.buffer.pop()
    }

    /// Produce fragments until the buffer is full or the stream ends.
    pub async fn fill_buffer(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ReaderClosed);
        }
        if self.state == ReaderState::BeforeStaticRow {
            self.touch_partition();
            if self.schema.has_static_columns() {
                self.process_static_row().await?;
            }
            if self.ranges.is_empty() {
                self.finish_reader();
                return Ok(());
            }
            self.state = ReaderState::ReadingFromCache;
            let region = self.snapshot.region().clone();
            region.run_in_read_section(|| self.move_to_range(0));
        }
        while !self.end_of_stream && !self.buffer.is_full() {
            self.do_fill_buffer().await?;
        }
        Ok(())
    }

    /// The next fragment, filling as needed; `None` at end of stream.
    pub async fn next_fragment(&mut self) -> Result<Option<Fragment>> {
        loop {
            if let Some(f) = self.buffer.pop() {
                return Ok(Some(f));
            }
            if self.end_of_stream {
                return Ok(None);
            }
            self.fill_buffer().await?;
        }
    }

    /// Drain buffered fragments of this partition and end the stream.
    pub fn next_partition(&mut self) {
        self.buffer.clear();
        self.end_of_stream = true;
        self.state = ReaderState::EndOfStream;
    }

    /// Position-range fast-forward is not supported on this reader.
    pub fn fast_forward_to(&mut self, _range: PositionRange) -> Result<()> {
        Err(Error::unsupported(
            "fast_forward_to(position_range) on a cache partition reader",
        ))
    }

    /// Partition-range fast-forward: this reader serves one partition, so
    /// the stream simply ends.
    pub fn fast_forward_to_partition_range(&mut self) {
        self.buffer.clear();
        self.end_of_stream = true;
        self.state = ReaderState::EndOfStream;
    }

    /// Release the reader's resources. Idempotent; after close no further
    /// `fill_buffer` is legal.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.end_of_stream = true;
        if self.ctx.is_owned() {
            self.ctx_mut().close().await?;
        }
        Ok(())
    }

    /// Adapt the reader into a fragment stream, closing it at the end.
    pub fn into_stream(self) -> impl Stream<Item = Result<Fragment>> + 'a {
        futures::stream::try_unfold(self, |mut reader| async move {
            match reader.next_fragment().await {
                Ok(Some(fragment)) => Ok(Some((fragment, reader))),
                Ok(None) => {
                    reader.close().await?;
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
    }

    fn touch_partition(&self) {
        self.snapshot.touch();
    }

    fn finish_reader(&mut self) {
        self.buffer.push(Fragment::PartitionEnd);
        self.end_of_stream = true;
        self.state = ReaderState::EndOfStream;
        tracing::trace!("end of stream");
    }

    fn can_populate(&self) -> bool {
        self.snapshot.at_latest_version()
            && self.ctx().cache().phase_of(self.ctx().key()) == self.ctx().phase()
    }

    fn after_current_range(&self, pos: &Position) -> bool {
        !self.cmp.lt(pos, &self.upper_bound)
    }

    fn emit_rtc(&mut self, position: Position, tombstone: Tombstone) {
        self.buffer
            .push(Fragment::RangeTombstoneChange(RangeTombstoneChange::new(
                position, tombstone,
            )));
    }

    async fn process_static_row(&mut self) -> Result<()> {
        if self.snapshot.static_row_continuous() {
            self.ctx().cache().on_row_hit();
            let digest = self.ctx().digest_requested();
            let region = self.snapshot.region().clone();
            let row = region.run_in_read_section(|| self.snapshot.static_row(digest));
            if let Some(row) = row {
                if !row.is_empty() {
                    self.buffer.push(Fragment::StaticRow { row });
                }
            }
            return Ok(());
        }
        self.ctx().cache().on_row_miss();
        self.ctx_mut().ensure_underlying().await?;
        let fragment = self.ctx_mut().underlying()?.next_fragment().await?;
        if let Some(fragment) = fragment {
            let Fragment::StaticRow { mut row } = fragment else {
                return Err(Error::source("expected a static row from underlying"));
            };
            if self.ctx().digest_requested() {
                row.prepare_digest();
            }
            self.maybe_add_static_row_to_cache(&row);
            if !row.is_empty() {
                self.buffer.push(Fragment::StaticRow { row });
            }
        }
        self.maybe_set_static_row_continuous();
        Ok(())
    }

    fn maybe_add_static_row_to_cache(&mut self, row: &Row) {
        if !self.can_populate() {
            self.ctx().cache().on_mispopulate();
            return;
        }
        self.ctx().cache().on_static_row_insert();
        let region = self.snapshot.region().clone();
        region.run_in_update_section(|| {
            self.snapshot.apply_static_row(row);
        });
    }

    fn maybe_set_static_row_continuous(&mut self) {
        if self.can_populate() {
            tracing::trace!("static row marked continuous");
            self.snapshot.set_static_row_continuous();
        } else {
            self.ctx().cache().on_mispopulate();
        }
    }

    async fn do_fill_buffer(&mut self) -> Result<()> {
        if self.state == ReaderState::MoveToUnderlying {
            self.ctx_mut().ensure_underlying().await?;
            self.state = ReaderState::ReadingFromUnderlying;
            self.population_range_starts_before_all_rows =
                self.lower_bound.is_before_all_rows() && !self.cmp.reversed;
            let uub = if self.next_row_in_range {
                self.next_row.position().before()
            } else {
                self.upper_bound.clone()
            };
            self.underlying_upper_bound = Some(uub.clone());
            if !self.ctx().partition_exists() {
                tracing::trace!("partition absent in underlying");
                if self.current_tombstone.is_some() {
                    let lb = self.lower_bound.clone();
                    self.emit_rtc(lb, Tombstone::NONE);
                    self.current_tombstone = Tombstone::NONE;
                }
                return self.read_from_underlying().await;
            }
            let range = PositionRange::new(self.lower_bound.clone(), uub);
            tracing::trace!(start = ?range.start, end = ?range.end, "fast-forward underlying");
            self.ctx_mut().underlying()?.fast_forward_to(range).await?;
            if self.current_tombstone.is_some() {
                // Avoid double-opening: only skip the close when the slice
                // starts with an opening change exactly at the bound.
                let lb = self.lower_bound.clone();
                let cmp = self.cmp;
                let continues = {
                    let peek = self.ctx_mut().underlying()?.peek().await?;
                    matches!(
                        peek,
                        Some(Fragment::RangeTombstoneChange(rtc))
                            if cmp.eq(&rtc.position, &lb)
                    )
                };
                if !continues {
                    self.emit_rtc(lb, Tombstone::NONE);
                    self.current_tombstone = Tombstone::NONE;
                }
            }
            return self.read_from_underlying().await;
        }
        if self.state == ReaderState::ReadingFromUnderlying {
            return self.read_from_underlying().await;
        }
        // ReadingFromCache
        let region = self.snapshot.region().clone();
        region.run_in_read_section(|| {
            // Eviction invalidates the cursor; a stale cursor means the
            // range may no longer be continuous.
            if !self.next_row.iterators_valid() {
                let adjacent = self.next_row.advance_to(&self.lower_bound);
                let pos = self.next_row.position();
                self.next_row_in_range = !self.after_current_range(&pos);
                if !adjacent && !self.next_row.continuous() {
                    self.last_row = None;
                    self.start_reading_from_underlying();
                    return;
                }
            }
            self.next_row.maybe_refresh();
            let mut ops = 0usize;
            while self.state == ReaderState::ReadingFromCache {
                self.copy_from_cache_to_buffer();
                ops += 1;
                if ops >= self.permit.preempt_after || self.buffer.is_full() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn read_from_underlying(&mut self) -> Result<()> {
        while self.state == ReaderState::ReadingFromUnderlying && !self.buffer.is_full() {
            let fragment = self.ctx_mut().underlying()?.next_fragment().await?;
            match fragment {
                Some(fragment) => {
                    self.ctx().cache().on_row_miss();
                    self.offer_from_underlying(fragment)?;
                }
                None => {
                    let uub = self
                        .underlying_upper_bound
                        .take()
                        .ok_or_else(|| Error::cache("underlying slice without an upper bound"))?;
                    self.lower_bound = uub;
                    self.state = ReaderState::ReadingFromCache;
                    let region = self.snapshot.region().clone();
                    region.run_in_update_section(|| self.after_underlying_slice());
                }
            }
        }
        Ok(())
    }

    fn offer_from_underlying(&mut self, fragment: Fragment) -> Result<()> {
        tracing::trace!(?fragment, "offer from underlying");
        match fragment {
            Fragment::ClusteringRow(mut cr) => {
                if self.ctx().digest_requested() {
                    cr.row.prepare_digest();
                }
                self.maybe_add_row_to_cache(&cr);
                self.add_clustering_row_to_buffer(cr);
                Ok(())
            }
            Fragment::RangeTombstoneChange(rtc) => {
                if self.maybe_add_rtc_to_cache(&rtc) {
                    self.add_rtc_to_buffer(rtc);
                }
                Ok(())
            }
            other => Err(Error::source(format!(
                "unexpected fragment from underlying: {other:?}"
            ))),
        }
    }

    /// Called under an update section once the underlying slice drained;
    /// `lower_bound` has been advanced to the slice cap.
    fn after_underlying_slice(&mut self) {
        let same_pos = self.next_row.maybe_refresh();
        tracing::trace!(
            same_pos,
            in_range = self.next_row_in_range,
            "underlying slice exhausted"
        );
        if !same_pos {
            // Arena invalidation moved an entry under the cursor; the range
            // up to lower_bound was not fully populated.
            self.ctx().cache().on_mispopulate();
            let pos = self.next_row.position();
            self.next_row_in_range = !self.after_current_range(&pos);
            if !self.next_row.continuous() {
                self.last_row = None;
                self.start_reading_from_underlying();
            }
            return;
        }
        if self.next_row_in_range {
            self.maybe_update_continuity();
            return;
        }
        if self.can_populate() {
            if let Some(range) = self.ranges.get(self.range_idx).cloned() {
                if range.is_single_row() {
                    // Range tombstones that applied to the row may have been
                    // evicted by now; an empty entry would then carry stale
                    // tombstone information.
                    if !self.has_rt {
                        if let Some(key) = range.single_row_key() {
                            let table_pos = self.cmp.to_table(&Position::at_key(key.clone()));
                            let spec = NewEntry::row(
                                table_pos,
                                RowPayload {
                                    tombstone: Tombstone::NONE,
                                    row: Row::new(),
                                },
                                Tombstone::NONE,
                            )
                            .inheriting();
                            match self.snapshot.insert_in_latest(spec) {
                                Ok((_, inserted)) => {
                                    if inserted {
                                        tracing::trace!("inserted empty entry for singular range");
                                    }
                                }
                                Err(AllocError) => {
                                    self.snapshot.region().invalidate_references();
                                }
                            }
                        }
                    }
                } else if self.ensure_population_lower_bound() {
                    let table_ub = self.cmp.to_table(&self.upper_bound);
                    match self.snapshot.insert_in_latest(NewEntry::dummy(table_ub.clone())) {
                        Ok((_, inserted)) => {
                            if inserted {
                                tracing::trace!(pos = ?table_ub, "inserted dummy at range end");
                            }
                            let t = self.current_tombstone;
                            if self.cmp.reversed {
                                if let Some(last) = &self.last_row {
                                    let pos = last.position().clone();
                                    self.snapshot.with_entry_in_latest_mut(&pos, |e| {
                                        e.set_continuous(true);
                                        e.set_range_tombstone(t);
                                    });
                                }
                            } else {
                                self.snapshot.with_entry_in_latest_mut(&table_ub, |e| {
                                    e.set_continuous(true);
                                    e.set_range_tombstone(t);
                                });
                            }
                            self.maybe_drop_last_entry(t);
                        }
                        Err(AllocError) => {
                            self.snapshot.region().invalidate_references();
                        }
                    }
                }
            }
        } else {
            self.ctx().cache().on_mispopulate();
        }
        self.move_to_next_range();
    }

    /// Copy one step from the cursor into the buffer.
    fn copy_from_cache_to_buffer(&mut self) {
        self.next_row.touch();

        let interval_rt = self.next_row.range_tombstone();
        if interval_rt != self.current_tombstone {
            let effective_ub = if self.next_row_in_range {
                self.next_row.position().before()
            } else {
                self.upper_bound.clone()
            };
            if !self.cmp.eq(&self.lower_bound, &effective_ub) {
                let lb = self.lower_bound.clone();
                tracing::trace!(pos = ?lb, t = ?interval_rt, "tombstone transition from cache");
                self.emit_rtc(lb, interval_rt);
                self.current_tombstone = interval_rt;
                self.lower_bound = effective_ub;
                self.snapshot.tracker().on_range_tombstone_read();
            }
        }

        if self.next_row_in_range {
            let row_rt = self.next_row.range_tombstone_for_row();
            if row_rt != self.current_tombstone {
                let new_lb = self.next_row.position().before();
                self.emit_rtc(new_lb.clone(), row_rt);
                self.lower_bound = new_lb;
                self.current_tombstone = row_rt;
                self.snapshot.tracker().on_range_tombstone_read();
            }
            self.add_cursor_row_to_buffer();
            self.move_to_next_entry();
        } else {
            self.move_to_next_range();
        }
    }

    fn add_cursor_row_to_buffer(&mut self) {
        if !self.next_row.dummy() {
            self.ctx().cache().on_row_hit();
            let Some(mut cr) = self.next_row.row() else {
                return;
            };
            // Fully empty entries only record row absence for singular
            // ranges; nothing to emit.
            if cr.row.is_empty() && cr.tombstone.is_none() {
                self.lower_bound = Position::after_key(cr.key);
                return;
            }
            if self.ctx().digest_requested() {
                cr.row.prepare_digest();
            }
            self.add_clustering_row_to_buffer(cr);
        } else {
            let pos = self.next_row.position();
            if self.cmp.lt(&self.lower_bound, &pos) {
                self.lower_bound = pos;
            }
            self.snapshot.tracker().on_dummy_row_hit();
        }
    }

    // Maintains, also on failure paths: no fragment at a position >=
    // lower_bound has been emitted yet.
    fn add_clustering_row_to_buffer(&mut self, cr: ClusteringRow) {
        let new_lower_bound = Position::after_key(cr.key.clone());
        let has_row_tombstone = cr.tombstone.is_some();
        self.buffer.push(Fragment::ClusteringRow(cr));
        self.lower_bound = new_lower_bound;
        if has_row_tombstone {
            self.snapshot.tracker().on_row_tombstone_read();
        }
    }

    fn add_rtc_to_buffer(&mut self, rtc: RangeTombstoneChange) {
        self.has_rt = true;
        self.lower_bound = rtc.position.clone();
        self.buffer.push(Fragment::RangeTombstoneChange(rtc));
        self.snapshot.tracker().on_range_tombstone_read();
    }

    fn start_reading_from_underlying(&mut self) {
        tracing::trace!(
            lb = ?self.lower_bound,
            in_range = self.next_row_in_range,
            "switch to underlying"
        );
        self.state = ReaderState::MoveToUnderlying;
        self.next_row.touch();
    }

    /// The cursor must be inside the range.
    fn move_to_next_entry(&mut self) {
        let pos = self.next_row.position();
        if self.cmp.no_clustering_row_between(&pos, &self.upper_bound) {
            self.move_to_next_range();
            return;
        }
        let new_last = self.next_row.weakref();
        // In reverse mode the cursor may fall off the low end of the store;
        // its position becomes the stream end and continuity is still
        // reported correctly.
        self.next_row.advance();
        self.last_row = new_last;
        let pos = self.next_row.position();
        self.next_row_in_range = !self.after_current_range(&pos);
        if !self.next_row.continuous() {
            self.start_reading_from_underlying();
        } else {
            let rt = self.next_row.range_tombstone();
            self.maybe_drop_last_entry(rt);
        }
    }

    fn move_to_next_range(&mut self) {
        if self.current_tombstone.is_some() {
            let ub = self.upper_bound.clone();
            self.emit_rtc(ub, Tombstone::NONE);
            self.current_tombstone = Tombstone::NONE;
        }
        let next = self.range_idx + 1;
        if next >= self.ranges.len() {
            self.range_idx = next;
            self.finish_reader();
        } else {
            self.move_to_range(next);
        }
    }

    fn move_to_range(&mut self, idx: usize) {
        let Some(range) = self.ranges.get(idx).cloned() else {
            self.finish_reader();
            return;
        };
        self.last_row = None;
        self.lower_bound = range.start_position();
        self.upper_bound = range.end_position();
        self.range_idx = idx;
        let adjacent = self.next_row.advance_to(&self.lower_bound);
        let pos = self.next_row.position();
        self.next_row_in_range = !self.after_current_range(&pos);
        tracing::trace!(
            lb = ?self.lower_bound,
            ub = ?self.upper_bound,
            next = ?pos,
            adjacent,
            "move to range"
        );
        if !adjacent && !self.next_row.continuous() {
            // No dummy for singular ranges: a hit would otherwise cost
            // three entries (before, at, after).
            if range.has_start_bound() && !range.is_single_row() {
                if self.can_populate() {
                    let table_lb = self.cmp.to_table(&self.lower_bound);
                    let region = self.snapshot.region().clone();
                    region.run_in_update_section(|| {
                        match self.snapshot.insert_in_latest(NewEntry::dummy(table_lb.clone())) {
                            Ok((id, _)) => {
                                tracing::trace!(pos = ?table_lb, "inserted dummy at range start");
                                self.last_row =
                                    Some(RowWeakRef::new(table_lb.clone(), id, self.snapshot.version()));
                            }
                            Err(AllocError) => {
                                region.invalidate_references();
                            }
                        }
                    });
                } else {
                    self.ctx().cache().on_mispopulate();
                }
            }
            self.start_reading_from_underlying();
        }
    }

    /// Guarantee `last_row` resolves to a latest-version entry at the
    /// population anchor. Assumes `can_populate()`.
    fn ensure_population_lower_bound(&mut self) -> bool {
        if self.population_range_starts_before_all_rows {
            return true;
        }
        let Some(last) = self.last_row.as_mut() else {
            return false;
        };
        if !last.refresh(&self.snapshot) {
            return false;
        }
        if !last.is_in_latest(&self.snapshot) {
            // The continuity flag we will set extends to the previous entry
            // in the same version, so the anchor must exist in the latest.
            let mut cursor = SnapshotRowCursor::new(self.snapshot.clone(), self.cmp.reversed);
            let q_pos = self.cmp.to_query(last.position());
            if !cursor.advance_to(&q_pos) {
                return false;
            }
            match cursor.ensure_entry_in_latest() {
                Ok(res) => {
                    if res.inserted {
                        tracing::trace!(pos = ?last.position(), "promoted population anchor");
                    }
                    last.set_latest(res.entry, res.version);
                }
                Err(AllocError) => {
                    self.snapshot.region().invalidate_references();
                    return false;
                }
            }
        }
        true
    }

    /// Mark the interval between `last_row` and the cursor continuous,
    /// provided the population anchor still matches the latest version.
    fn maybe_update_continuity(&mut self) {
        let populate_ok = self.can_populate() && self.ensure_population_lower_bound();
        let next_table = self.cmp.to_table(&self.next_row.position());
        let distinct = match &self.last_row {
            Some(last) => *last.position() != next_table,
            // anchored at the partition start
            None => true,
        };
        if !(populate_ok && distinct) {
            self.ctx().cache().on_mispopulate();
            return;
        }
        let region = self.snapshot.region().clone();
        region.run_in_update_section(|| {
            if let Err(AllocError) = self.next_row.ensure_entry_in_latest() {
                region.invalidate_references();
                self.ctx().cache().on_mispopulate();
                return;
            }
            let t = self.current_tombstone;
            if self.cmp.reversed {
                let Some(last) = self.last_row.clone() else {
                    return;
                };
                let last_pos = last.position().clone();
                let Some(flags) = self.snapshot.entry_in_latest(&last_pos) else {
                    self.ctx().cache().on_mispopulate();
                    return;
                };
                if t != flags.range_tombstone && !flags.dummy {
                    // The anchor needs a differing tombstone; shield the
                    // interval before it with a dummy carrying the new one.
                    let dummy_pos = last_pos.before();
                    match self.snapshot.insert_in_latest(NewEntry::dummy(dummy_pos.clone())) {
                        Ok(_) => {
                            self.snapshot.with_entry_in_latest_mut(&dummy_pos, |e| {
                                e.set_continuous(true);
                                e.set_range_tombstone(t);
                            });
                            self.snapshot.with_entry_in_latest_mut(&last_pos, |e| {
                                e.set_continuous(true);
                            });
                        }
                        Err(AllocError) => {
                            region.invalidate_references();
                            self.ctx().cache().on_mispopulate();
                            return;
                        }
                    }
                } else {
                    self.snapshot.with_entry_in_latest_mut(&last_pos, |e| {
                        e.set_continuous(true);
                        e.set_range_tombstone(t);
                    });
                }
            } else {
                let entry_pos = next_table.clone();
                let Some(flags) = self.snapshot.entry_in_latest(&entry_pos) else {
                    self.ctx().cache().on_mispopulate();
                    return;
                };
                if t != flags.range_tombstone && !flags.dummy {
                    // A non-dummy terminal entry keeps its own tombstone;
                    // the differing interval tombstone lives on a dummy
                    // just before it.
                    let dummy_pos = entry_pos.before();
                    match self.snapshot.insert_in_latest(NewEntry::dummy(dummy_pos.clone())) {
                        Ok(_) => {
                            self.snapshot.with_entry_in_latest_mut(&dummy_pos, |e| {
                                e.set_continuous(true);
                                e.set_range_tombstone(t);
                            });
                            self.snapshot.with_entry_in_latest_mut(&entry_pos, |e| {
                                e.set_continuous(true);
                            });
                        }
                        Err(AllocError) => {
                            region.invalidate_references();
                            self.ctx().cache().on_mispopulate();
                            return;
                        }
                    }
                } else {
                    self.snapshot.with_entry_in_latest_mut(&entry_pos, |e| {
                        e.set_range_tombstone(t);
                        e.set_continuous(true);
                    });
                }
            }
            self.maybe_drop_last_entry(t);
        });
    }

    fn maybe_add_row_to_cache(&mut self, cr: &ClusteringRow) {
        if !self.can_populate() {
            self.last_row = None;
            self.population_range_starts_before_all_rows = false;
            self.ctx().cache().on_mispopulate();
            return;
        }
        tracing::trace!(key = ?cr.key, rt = ?self.current_tombstone, "populate row");
        let region = self.snapshot.region().clone();
        region.run_in_update_section(|| {
            let table_pos = self.cmp.to_table(&cr.position());
            let spec = NewEntry::row(
                table_pos.clone(),
                RowPayload {
                    tombstone: cr.tombstone,
                    row: cr.row.clone(),
                },
                self.current_tombstone,
            );
            match self.snapshot.insert_in_latest(spec) {
                Ok((id, _)) => {
                    if self.ensure_population_lower_bound() {
                        let t = self.current_tombstone;
                        if self.cmp.reversed {
                            // The tombstone must also apply to the anchor
                            // itself, otherwise a later change would sit
                            // right after it.
                            if let Some(last) = &self.last_row {
                                let pos = last.position().clone();
                                self.snapshot.with_entry_in_latest_mut(&pos, |e| {
                                    e.set_continuous(true);
                                    e.set_range_tombstone(t);
                                });
                            }
                        } else {
                            self.snapshot.with_entry_in_latest_mut(&table_pos, |e| {
                                e.set_continuous(true);
                                e.set_range_tombstone(t);
                            });
                        }
                    } else {
                        self.ctx().cache().on_mispopulate();
                    }
                    self.last_row = Some(RowWeakRef::new(table_pos, id, self.snapshot.version()));
                    self.population_range_starts_before_all_rows = false;
                }
                Err(AllocError) => {
                    region.invalidate_references();
                    self.last_row = None;
                    self.population_range_starts_before_all_rows = false;
                    self.ctx().cache().on_mispopulate();
                }
            }
        });
    }

    /// Returns whether the change should be emitted.
    fn maybe_add_rtc_to_cache(&mut self, rtc: &RangeTombstoneChange) -> bool {
        // Never emit the closing change at the slice cap; the same
        // tombstone may continue from cache past the boundary.
        if let Some(uub) = &self.underlying_upper_bound {
            if self.cmp.eq(&rtc.position, uub) {
                self.lower_bound = rtc.position.clone();
                return false;
            }
        }
        let prev = std::mem::replace(&mut self.current_tombstone, rtc.tombstone);
        if self.current_tombstone == prev {
            return false;
        }
        if !self.can_populate() {
            self.last_row = None;
            self.population_range_starts_before_all_rows = false;
            self.ctx().cache().on_mispopulate();
            return true;
        }
        let region = self.snapshot.region().clone();
        region.run_in_update_section(|| {
            let table_pos = self.cmp.to_table(&rtc.position);
            match self.snapshot.insert_in_latest(NewEntry::dummy(table_pos.clone())) {
                Ok((id, _)) => {
                    if self.ensure_population_lower_bound() {
                        // The underlying may emit consecutive changes at one
                        // position; the interval covered by the first is
                        // then empty and carries nothing.
                        let precedes = match &self.last_row {
                            Some(last) => {
                                let last_q = self.cmp.to_query(last.position());
                                self.cmp.lt(&last_q, &rtc.position)
                            }
                            // population interval starts at the partition
                            // start
                            None => true,
                        };
                        if precedes {
                            if self.cmp.reversed {
                                if let Some(last) = &self.last_row {
                                    let pos = last.position().clone();
                                    self.snapshot.with_entry_in_latest_mut(&pos, |e| {
                                        e.set_continuous(true);
                                        e.set_range_tombstone(prev);
                                    });
                                }
                            } else {
                                self.snapshot.with_entry_in_latest_mut(&table_pos, |e| {
                                    e.set_continuous(true);
                                    e.set_range_tombstone(prev);
                                });
                            }
                        }
                    } else {
                        self.ctx().cache().on_mispopulate();
                    }
                    self.last_row = Some(RowWeakRef::new(table_pos, id, self.snapshot.version()));
                    self.population_range_starts_before_all_rows = false;
                }
                Err(AllocError) => {
                    region.invalidate_references();
                    self.last_row = None;
                    self.population_range_starts_before_all_rows = false;
                    self.ctx().cache().on_mispopulate();
                }
            }
        });
        true
    }

    /// Drop the anchor entry when it is a redundant dummy inside a
    /// continuous interval with a matching tombstone. Keeps the logical
    /// contents of the partition unchanged; only legal when the snapshot
    /// is both the latest and the oldest version.
    fn maybe_drop_last_entry(&mut self, rt: Tombstone) {
        if self.cmp.reversed {
            return;
        }
        let Some(last) = self.last_row.clone() else {
            return;
        };
        if last.position().is_after_all_rows() {
            return;
        }
        if !(self.snapshot.at_latest_version() && self.snapshot.at_oldest_version()) {
            return;
        }
        let Some(flags) = self.snapshot.entry_in_latest(last.position()) else {
            return;
        };
        if !(flags.dummy && flags.continuous && flags.range_tombstone == rt) {
            return;
        }
        tracing::trace!(pos = ?last.position(), "dropping redundant dummy");
        self.snapshot.remove_from_latest(last.position());
        self.last_row = None;
        // Iterators may point at the removed entry.
        self.snapshot.region().invalidate_references_now();
        // move_to_next_entry expects the cursor to stay valid.
        self.next_row.force_valid();
    }
}

impl std::fmt::Debug for CachePartitionReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePartitionReader")
            .field("state", &self.state)
            .field("range_idx", &self.range_idx)
            .field("lower_bound", &self.lower_bound)
            .field("upper_bound", &self.upper_bound)
            .field("current_tombstone", &self.current_tombstone)
            .field("end_of_stream", &self.end_of_stream)
            .finish()
    }
}
