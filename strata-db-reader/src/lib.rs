//! # strata-db-reader
//!
//! The cache-coherent per-partition reader: merges cached clustered state
//! with the authoritative underlying source, emits an ordered fragment
//! stream, and populates the cache without ever letting correctness of the
//! emitted data depend on population success.
//!
//! The reader is an asynchronous fragment producer driven by
//! `fill_buffer`; suspension happens only at underlying-source I/O and at
//! buffer-full yields. All cache work runs inside synchronous read/update
//! sections against the snapshot's arena region.

pub mod buffer;
pub mod context;
pub mod memory;
pub mod reader;
pub mod underlying;

pub use buffer::FragmentBuffer;
pub use context::{ReadContext, ReadContextHolder, ReadPermit, UnderlyingSource};
pub use memory::{MemoryPartition, MemorySource, TombstoneSpan};
pub use reader::CachePartitionReader;
pub use underlying::{FragmentSource, UnderlyingReader};
