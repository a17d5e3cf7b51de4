//! Read contexts: per-read state shared between the reader and the cache.
//!
//! A context carries the partition identity, the read direction, resource
//! accounting, the population phase captured at construction, and the lazy
//! handle onto the authoritative source. The reader holds it either owned
//! or borrowed ([`ReadContextHolder`]); an owned context is released by the
//! reader's `close`, a borrowed one by its caller.

use crate::underlying::{FragmentSource, UnderlyingReader};
use async_trait::async_trait;
use std::sync::Arc;
use strata_db_cache::RowCache;
use strata_db_core::{DecoratedKey, Error, Result};

/// Resource accounting knobs for one read.
#[derive(Clone, Copy, Debug)]
pub struct ReadPermit {
    /// Fragment capacity of the reader's staging buffer.
    pub max_buffered_fragments: usize,
    /// Cooperative preemption: cache-copy iterations per `fill_buffer`
    /// before yielding.
    pub preempt_after: usize,
}

impl Default for ReadPermit {
    fn default() -> Self {
        ReadPermit {
            max_buffered_fragments: 128,
            preempt_after: 64,
        }
    }
}

impl ReadPermit {
    pub fn with_max_buffered(mut self, n: usize) -> Self {
        self.max_buffered_fragments = n.max(1);
        self
    }

    pub fn with_preempt_after(mut self, n: usize) -> Self {
        self.preempt_after = n.max(1);
        self
    }
}

/// Lazy opener for the authoritative source of one partition.
#[async_trait]
pub trait UnderlyingSource: Send {
    /// Whether the partition exists at all in the authoritative source.
    fn partition_exists(&self) -> bool;

    /// Open the fragment stream for `key`. Called at most once per context.
    async fn open(&mut self, key: &DecoratedKey, reversed: bool) -> Result<Box<dyn FragmentSource>>;

    /// Release source resources.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Per-read state shared between the reader and the row cache.
pub struct ReadContext {
    cache: Arc<RowCache>,
    key: DecoratedKey,
    reversed: bool,
    digest_requested: bool,
    phase: u64,
    permit: ReadPermit,
    source: Box<dyn UnderlyingSource>,
    underlying: Option<UnderlyingReader>,
    closed: bool,
}

impl ReadContext {
    pub fn new(
        cache: Arc<RowCache>,
        key: DecoratedKey,
        source: Box<dyn UnderlyingSource>,
    ) -> Self {
        let phase = cache.phase_of(&key);
        ReadContext {
            cache,
            key,
            reversed: false,
            digest_requested: false,
            phase,
            permit: ReadPermit::default(),
            source,
            underlying: None,
            closed: false,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    pub fn with_digest(mut self) -> Self {
        self.digest_requested = true;
        self
    }

    pub fn with_permit(mut self, permit: ReadPermit) -> Self {
        self.permit = permit;
        self
    }

    pub fn cache(&self) -> &RowCache {
        &self.cache
    }

    pub fn key(&self) -> &DecoratedKey {
        &self.key
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn digest_requested(&self) -> bool {
        self.digest_requested
    }

    /// The population phase captured when this context was created.
    pub fn phase(&self) -> u64 {
        self.phase
    }

    pub fn permit(&self) -> ReadPermit {
        self.permit
    }

    pub fn partition_exists(&self) -> bool {
        self.source.partition_exists()
    }

    /// Open the underlying reader if it is not open yet.
    pub async fn ensure_underlying(&mut self) -> Result<()> {
        if self.underlying.is_some() {
            return Ok(());
        }
        let source = self.source.open(&self.key, self.reversed).await?;
        self.underlying = Some(UnderlyingReader::new(source));
        Ok(())
    }

    /// The opened underlying reader; an error before `ensure_underlying`.
    pub fn underlying(&mut self) -> Result<&mut UnderlyingReader> {
        self.underlying
            .as_mut()
            .ok_or_else(|| Error::cache("underlying reader not open"))
    }

    pub fn underlying_opened(&self) -> bool {
        self.underlying.is_some()
    }

    /// Release the context's resources. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.underlying = None;
        self.source.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for ReadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadContext")
            .field("key", &self.key)
            .field("reversed", &self.reversed)
            .field("phase", &self.phase)
            .field("underlying_opened", &self.underlying.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Owned-or-borrowed context, so the reader can guarantee release on every
/// exit path without taking ownership it was not given.
pub enum ReadContextHolder<'a> {
    Owned(Box<ReadContext>),
    Borrowed(&'a mut ReadContext),
}

impl<'a> ReadContextHolder<'a> {
    pub fn get(&self) -> &ReadContext {
        match self {
            ReadContextHolder::Owned(ctx) => ctx,
            ReadContextHolder::Borrowed(ctx) => ctx,
        }
    }

    pub fn get_mut(&mut self) -> &mut ReadContext {
        match self {
            ReadContextHolder::Owned(ctx) => ctx,
            ReadContextHolder::Borrowed(ctx) => ctx,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, ReadContextHolder::Owned(_))
    }
}

impl std::fmt::Debug for ReadContextHolder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadContextHolder::Owned(ctx) => f.debug_tuple("Owned").field(ctx).finish(),
            ReadContextHolder::Borrowed(ctx) => f.debug_tuple("Borrowed").field(ctx).finish(),
        }
    }
}
