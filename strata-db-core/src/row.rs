//! Row payloads: ordered cell maps with memoized content digests.

use crate::key::ColumnId;
use std::collections::BTreeMap;
use xxhash_rust::xxh3::Xxh3;

/// A single cell value with its write timestamp.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Cell {
    pub timestamp: i64,
    pub value: Vec<u8>,
}

impl Cell {
    pub fn new(timestamp: i64, value: impl Into<Vec<u8>>) -> Self {
        Cell {
            timestamp,
            value: value.into(),
        }
    }
}

/// An ordered map of cells, either the static row or one clustering row's
/// regular columns.
///
/// Digest-requesting reads prepare a 64-bit content hash over the cells;
/// the hash is memoized so repeated preparation is free.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Row {
    cells: BTreeMap<ColumnId, Cell>,
    digest: Option<u64>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    /// Build a row from `(column, timestamp, value)` triples.
    pub fn from_cells<V: Into<Vec<u8>>>(cells: impl IntoIterator<Item = (ColumnId, i64, V)>) -> Self {
        let mut row = Row::new();
        for (col, ts, value) in cells {
            row.put_cell(col, Cell::new(ts, value));
        }
        row
    }

    pub fn put_cell(&mut self, column: ColumnId, cell: Cell) {
        self.cells.insert(column, cell);
        self.digest = None;
    }

    pub fn cells(&self) -> impl Iterator<Item = (&ColumnId, &Cell)> {
        self.cells.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Merge `other`'s cells into this row; per column the greater write
    /// timestamp wins.
    pub fn apply(&mut self, other: &Row) {
        for (col, cell) in other.cells() {
            match self.cells.get(col) {
                Some(existing) if existing.timestamp >= cell.timestamp => {}
                _ => {
                    self.cells.insert(*col, cell.clone());
                }
            }
        }
        self.digest = None;
    }

    /// Compute and memoize the cell-content digest.
    pub fn prepare_digest(&mut self) -> u64 {
        if let Some(d) = self.digest {
            return d;
        }
        let mut hasher = Xxh3::new();
        for (col, cell) in &self.cells {
            hasher.update(&col.0.to_le_bytes());
            hasher.update(&cell.timestamp.to_le_bytes());
            hasher.update(&cell.value);
        }
        let d = hasher.digest();
        self.digest = Some(d);
        d
    }

    /// The memoized digest, if one has been prepared.
    pub fn digest(&self) -> Option<u64> {
        self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_memoized_and_content_sensitive() {
        let mut a = Row::from_cells([(ColumnId(1), 5, b"x".as_slice())]);
        let d1 = a.prepare_digest();
        assert_eq!(a.prepare_digest(), d1);
        assert_eq!(a.digest(), Some(d1));

        let mut b = Row::from_cells([(ColumnId(1), 5, b"y".as_slice())]);
        assert_ne!(b.prepare_digest(), d1);

        a.put_cell(ColumnId(2), Cell::new(6, b"z".to_vec()));
        assert_eq!(a.digest(), None);
        assert_ne!(a.prepare_digest(), d1);
    }
}
