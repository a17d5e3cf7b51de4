//! Table schema handle.

use crate::key::ColumnId;
use std::sync::Arc;

/// Column order and static-column presence for one table.
///
/// Shared as `Arc<Schema>`; the reader only consults static-column presence
/// and table identity, the cells themselves carry their column ids.
#[derive(Clone, Debug)]
pub struct Schema {
    keyspace: String,
    table: String,
    static_columns: Vec<ColumnId>,
    regular_columns: Vec<ColumnId>,
}

impl Schema {
    pub fn new(
        keyspace: impl Into<String>,
        table: impl Into<String>,
        static_columns: Vec<ColumnId>,
        regular_columns: Vec<ColumnId>,
    ) -> Arc<Self> {
        Arc::new(Schema {
            keyspace: keyspace.into(),
            table: table.into(),
            static_columns,
            regular_columns,
        })
    }

    /// A minimal schema with `regular` regular columns and no statics.
    pub fn simple(table: impl Into<String>, regular: u32) -> Arc<Self> {
        Schema::new(
            "ks",
            table,
            Vec::new(),
            (0..regular).map(ColumnId).collect(),
        )
    }

    /// Same, plus `statics` static columns.
    pub fn with_statics(table: impl Into<String>, regular: u32, statics: u32) -> Arc<Self> {
        Schema::new(
            "ks",
            table,
            (0..statics).map(|i| ColumnId(1000 + i)).collect(),
            (0..regular).map(ColumnId).collect(),
        )
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn has_static_columns(&self) -> bool {
        !self.static_columns.is_empty()
    }

    pub fn static_columns(&self) -> &[ColumnId] {
        &self.static_columns
    }

    pub fn regular_columns(&self) -> &[ColumnId] {
        &self.regular_columns
    }
}
