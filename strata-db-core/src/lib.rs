//! # strata-db-core
//!
//! Partition data model shared across the strata-db crates.
//!
//! This crate provides:
//! - The position algebra: a total order over clustering positions with a
//!   query/table reversal bijection
//! - Tombstones, rows/cells and the fragment stream vocabulary
//! - Clustering-key filter ranges
//! - The shared error type
//!
//! ## Design Principles
//!
//! 1. **Tagged sum types**: fragments and positions are enums, never trait
//!    hierarchies
//! 2. **One position type, two domains**: reversal is a bijection applied at
//!    the storage/query boundary, not a second type
//! 3. **No I/O**: this crate is pure data model

pub mod error;
pub mod filter;
pub mod fragment;
pub mod key;
pub mod position;
pub mod row;
pub mod schema;
pub mod tombstone;

pub use error::{Error, Result};
pub use filter::{ClusteringRange, FilterRanges, PositionRange};
pub use fragment::{ClusteringRow, Fragment, RangeTombstoneChange};
pub use key::{ClusteringKey, ColumnId, DecoratedKey};
pub use position::{BoundWeight, DomainCmp, Position};
pub use row::{Cell, Row};
pub use schema::Schema;
pub use tombstone::Tombstone;
