//! Core traits at the seams of the migration engine.
//!
//! - [`SourceReader`]: catalog metadata and forward-only row streams from the source
//! - [`TargetWriter`] / [`TargetSession`]: DDL execution and transactional inserts on the target
//! - [`TypeMapper`]: source column types to target column types
//!
//! The orchestrator only talks to these traits, so the engine runs unchanged
//! against live databases or the in-memory endpoints in [`crate::memory`].

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::ddl::DdlStatement;
use crate::error::{MigrateError, Result};

use super::schema::{ColumnSpec, ForeignKeySpec, IndexSpec, TableSpec};
use super::value::{Batch, Row, SqlNullType};

/// Options for streaming rows out of one table.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Source table name.
    pub table: String,
    /// Columns to read, in output order.
    pub columns: Vec<ColumnSpec>,
    /// Rows per emitted batch.
    pub batch_size: usize,
}

/// Source database reader.
///
/// Metadata methods take source table names exactly as the catalog stores them.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// List user tables (views and system tables excluded), sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns in declaration order.
    async fn load_columns(&self, table: &str) -> Result<Vec<ColumnSpec>>;

    /// Primary key column names in key order; empty when the table has none.
    async fn load_primary_key(&self, table: &str) -> Result<Vec<String>>;

    async fn load_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeySpec>>;

    /// Secondary indexes, excluding indexes that back PK/FK/UNIQUE constraints
    /// already carried elsewhere.
    async fn load_indexes(&self, table: &str) -> Result<Vec<IndexSpec>>;

    /// Load the complete metadata for one table.
    async fn load_table(&self, table: &str) -> Result<TableSpec> {
        Ok(TableSpec {
            name: table.to_string(),
            columns: self.load_columns(table).await?,
            primary_key: self.load_primary_key(table).await?,
            foreign_keys: self.load_foreign_keys(table).await?,
            indexes: self.load_indexes(table).await?,
        })
    }

    /// Exact row count.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Stream rows from a table.
    ///
    /// Rows arrive in bounded batches through the channel; the reader stops
    /// when the receiver is dropped. A read error is sent as the last item.
    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}

/// Resolved target names for an INSERT.
#[derive(Debug, Clone)]
pub struct InsertTarget {
    /// Folded, unquoted table name.
    pub table: String,
    /// Table name ready to splice into SQL.
    pub quoted_table: String,
    /// Column names ready to splice into SQL, in row order.
    pub quoted_columns: Vec<String>,
}

/// Target database writer.
///
/// Each worker opens its own session; sessions are never shared.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Open a dedicated session (one connection).
    async fn open_session(&self) -> Result<Box<dyn TargetSession>>;

    /// Check whether a table exists, by folded name.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Row count by folded name.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}

/// One target connection with explicit transaction control.
#[async_trait]
pub trait TargetSession: Send {
    /// Execute one DDL or session statement outside any explicit transaction.
    async fn execute(&mut self, stmt: &DdlStatement) -> Result<()>;

    async fn begin(&mut self) -> Result<()>;

    /// Insert rows inside the current transaction. Either all rows are
    /// accepted or the call fails.
    async fn insert_rows(&mut self, target: &InsertTarget, rows: &[Row]) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Value-level shape of a target column.
///
/// The transfer engine converts every source value into the representation
/// its column's kind expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    SmallInt,
    Int,
    BigInt,
    Decimal { precision: u32, scale: u32 },
    Float,
    Double,
    Bool,
    Char { length: u32 },
    Varchar { length: u32 },
    Text,
    Binary { length: u32 },
    Varbinary { length: u32 },
    Blob,
    Date,
    Time,
    DateTime,
}

impl TargetKind {
    /// NULL type hint matching this kind.
    pub fn null_type(&self) -> SqlNullType {
        match self {
            TargetKind::SmallInt => SqlNullType::I16,
            TargetKind::Int => SqlNullType::I32,
            TargetKind::BigInt => SqlNullType::I64,
            TargetKind::Decimal { .. } => SqlNullType::Decimal,
            TargetKind::Float => SqlNullType::F32,
            TargetKind::Double => SqlNullType::F64,
            TargetKind::Bool => SqlNullType::Bool,
            TargetKind::Char { .. } | TargetKind::Varchar { .. } | TargetKind::Text => {
                SqlNullType::String
            }
            TargetKind::Binary { .. } | TargetKind::Varbinary { .. } | TargetKind::Blob => {
                SqlNullType::Bytes
            }
            TargetKind::Date => SqlNullType::Date,
            TargetKind::Time => SqlNullType::Time,
            TargetKind::DateTime => SqlNullType::DateTime,
        }
    }

    /// Whether MySQL needs a prefix length when this column is a key part.
    pub fn needs_key_prefix(&self) -> bool {
        matches!(self, TargetKind::Text | TargetKind::Blob)
    }
}

/// Maps source column types to target column types.
pub trait TypeMapper: Send + Sync {
    /// Map a source type with its length, precision and scale.
    ///
    /// Unknown types fail with `MigrateError::UnsupportedType` whose table
    /// and column are left empty.
    fn map_type(
        &self,
        data_type: &str,
        max_length: i32,
        precision: i32,
        scale: i32,
    ) -> Result<TypeMapping>;

    /// Map a column, applying column-level hints (domain, character set).
    fn map_column(&self, table: &str, col: &ColumnSpec) -> Result<TypeMapping> {
        self.map_type(&col.data_type, col.max_length, col.precision, col.scale)
            .map_err(|e| with_column_context(e, table, &col.name))
    }
}

/// Attach table and column names to an `UnsupportedType` error.
pub(crate) fn with_column_context(err: MigrateError, table: &str, column: &str) -> MigrateError {
    match err {
        MigrateError::UnsupportedType { source_type, .. } => {
            MigrateError::unsupported(table, column, source_type)
        }
        other => other,
    }
}

/// Result of mapping one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// Target column type, e.g. `DECIMAL(18,2)`.
    pub target_type: String,
    /// Value-level shape used by the transfer engine.
    pub kind: TargetKind,
    /// Whether values may lose information.
    pub is_lossy: bool,
    /// Explanation for lossy mappings.
    pub warning: Option<String>,
}

impl TypeMapping {
    /// Create a lossless mapping.
    pub fn lossless(target_type: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            target_type: target_type.into(),
            kind,
            is_lossy: false,
            warning: None,
        }
    }

    /// Create a lossy mapping with a warning.
    pub fn lossy(target_type: impl Into<String>, kind: TargetKind, warning: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            kind,
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping_lossless() {
        let m = TypeMapping::lossless("INT", TargetKind::Int);
        assert_eq!(m.target_type, "INT");
        assert!(!m.is_lossy);
        assert!(m.warning.is_none());
    }

    #[test]
    fn test_type_mapping_lossy() {
        let m = TypeMapping::lossy("DATETIME(4)", TargetKind::DateTime, "zone dropped");
        assert!(m.is_lossy);
        assert_eq!(m.warning.as_deref(), Some("zone dropped"));
    }

    #[test]
    fn test_key_prefix_kinds() {
        assert!(TargetKind::Text.needs_key_prefix());
        assert!(TargetKind::Blob.needs_key_prefix());
        assert!(!TargetKind::Varchar { length: 255 }.needs_key_prefix());
    }

    #[test]
    fn test_column_context() {
        let err = MigrateError::unsupported("", "", "ARRAY OF INTEGER");
        let err = with_column_context(err, "SALES", "QTY");
        assert_eq!(
            err.to_string(),
            "Unsupported type 'ARRAY OF INTEGER' for column SALES.QTY"
        );
    }
}
