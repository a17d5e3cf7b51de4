//! The underlying reader adapter.
//!
//! The authoritative source is abstracted as a [`FragmentSource`]: an
//! already-positioned stream of fragments for one partition that can be
//! fast-forwarded to position slices. The adapter layers one-fragment
//! lookahead on top, which the reader uses to decide whether a held-open
//! range tombstone must be closed before switching sources.

use async_trait::async_trait;
use strata_db_core::{Fragment, PositionRange, Result};

/// An ordered fragment stream over one partition of the authoritative
/// source.
///
/// After opening, the stream yields the static row (when one exists)
/// followed by the fragments of whichever slice it was last fast-forwarded
/// to, in query order.
#[async_trait]
pub trait FragmentSource: Send {
    /// Restrict the stream to the half-open position slice `range`,
    /// discarding anything pending from an earlier slice.
    async fn fast_forward_to(&mut self, range: PositionRange) -> Result<()>;

    /// The next fragment of the current slice, or `None` when the slice is
    /// exhausted.
    async fn next_fragment(&mut self) -> Result<Option<Fragment>>;
}

/// Lazy adapter over an opened [`FragmentSource`] with single-fragment
/// lookahead.
pub struct UnderlyingReader {
    source: Box<dyn FragmentSource>,
    peeked: Option<Fragment>,
}

impl UnderlyingReader {
    pub fn new(source: Box<dyn FragmentSource>) -> Self {
        UnderlyingReader {
            source,
            peeked: None,
        }
    }

    /// Fast-forward the source, dropping any lookahead.
    pub async fn fast_forward_to(&mut self, range: PositionRange) -> Result<()> {
        self.peeked = None;
        self.source.fast_forward_to(range).await
    }

    /// Peek at the next fragment without consuming it.
    pub async fn peek(&mut self) -> Result<Option<&Fragment>> {
        if self.peeked.is_none() {
            self.peeked = self.source.next_fragment().await?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Consume the next fragment.
    pub async fn next_fragment(&mut self) -> Result<Option<Fragment>> {
        if let Some(f) = self.peeked.take() {
            return Ok(Some(f));
        }
        self.source.next_fragment().await
    }
}

impl std::fmt::Debug for UnderlyingReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnderlyingReader")
            .field("peeked", &self.peeked.is_some())
            .finish()
    }
}
