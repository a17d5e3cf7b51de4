//! Error types for strata-db-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared across the strata-db crates
#[derive(Error, Debug)]
pub enum Error {
    /// Operation not supported by this reader (programmer error)
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The reader has been closed; no further reads are legal
    #[error("reader already closed")]
    ReaderClosed,

    /// Failure reported by the underlying authoritative source
    #[error("underlying source error: {0}")]
    Source(String),

    /// Cache-internal invariant failure
    #[error("cache error: {0}")]
    Cache(String),
}

impl Error {
    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an underlying-source error
    pub fn source(msg: impl Into<String>) -> Self {
        Error::Source(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Error::Cache(msg.into())
    }
}
