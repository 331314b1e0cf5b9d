//! Core abstractions shared by every stage of a migration.
//!
//! - [`schema`]: table, column, key and index metadata
//! - [`value`]: SQL values and row batches
//! - [`identifier`]: MySQL identifier folding and quoting
//! - [`traits`]: source, target and type-mapping seams

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnSpec, ForeignKeySpec, IndexSpec, ReferentialAction, TableSpec};
pub use traits::{
    InsertTarget, ReadOptions, SourceReader, TargetKind, TargetSession, TargetWriter, TypeMapper,
    TypeMapping,
};
pub use value::{Batch, Row, SqlNullType, SqlValue};
