//! Key and identifier newtypes shared across the engine.

use std::fmt;

/// A clustering key within a partition.
///
/// Keys compare bytewise in table order; reversed reads flip the comparison
/// at the query boundary, never the key itself.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusteringKey(Vec<u8>);

impl ClusteringKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        ClusteringKey(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ClusteringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ck:{:02x?}", self.0)
    }
}

impl From<&[u8]> for ClusteringKey {
    fn from(bytes: &[u8]) -> Self {
        ClusteringKey(bytes.to_vec())
    }
}

impl From<&str> for ClusteringKey {
    fn from(s: &str) -> Self {
        ClusteringKey(s.as_bytes().to_vec())
    }
}

/// Partition identity: a ring token plus the raw partition key.
///
/// Opaque to the reader; it only travels in `PartitionStart` fragments and
/// identifies the partition to the row cache and the underlying source.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DecoratedKey {
    pub token: u64,
    pub key: Vec<u8>,
}

impl DecoratedKey {
    pub fn new(token: u64, key: impl Into<Vec<u8>>) -> Self {
        DecoratedKey {
            token,
            key: key.into(),
        }
    }
}

/// Column identifier within a schema.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ColumnId(pub u32);
