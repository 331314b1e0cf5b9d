//! Schema metadata read from the source catalog.
//!
//! These types are produced once by the introspector and are read-only
//! afterwards; everything downstream borrows or clones them.

use serde::{Deserialize, Serialize};

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name as stored in the source catalog (trimmed).
    pub name: String,

    /// Column definitions in declaration order.
    pub columns: Vec<ColumnSpec>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Foreign key constraints declared on this table.
    pub foreign_keys: Vec<ForeignKeySpec>,

    /// Secondary indexes (constraint-backing indexes excluded).
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    /// Create a table with no keys or indexes.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Look up a column by its source name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of the tables this one references, excluding itself.
    pub fn referenced_tables(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.ref_table.as_str())
            .filter(move |t| *t != self.name)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,

    /// Normalized source type name (e.g. "INTEGER", "VARCHAR", "BLOB SUB_TYPE TEXT").
    pub data_type: String,

    /// Character length for string types, byte length for binary strings.
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale (non-negative).
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Default clause as written in the source, without the DEFAULT keyword.
    pub default: Option<String>,

    /// User domain the column is declared on, if any.
    pub domain: Option<String>,

    /// Character set of string columns (e.g. "UTF8", "OCTETS").
    pub charset: Option<String>,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

impl ColumnSpec {
    /// Create a nullable column with no length, precision or default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            default: None,
            domain: None,
            charset: None,
            ordinal_pos: 0,
        }
    }

    pub fn with_length(mut self, max_length: i32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// True for binary string columns (`CHARACTER SET OCTETS`) and non-text blobs.
    pub fn is_binary(&self) -> bool {
        match self.data_type.as_str() {
            "BLOB" => true,
            "CHAR" | "VARCHAR" => self
                .charset
                .as_deref()
                .is_some_and(|cs| cs.eq_ignore_ascii_case("OCTETS")),
            _ => false,
        }
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,

    /// Indexed column names, in key order.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub is_unique: bool,

    /// Whether the index is descending.
    pub is_descending: bool,
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    /// Constraint name.
    pub name: String,

    /// Referencing column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: ReferentialAction,

    /// ON UPDATE action.
    pub on_update: ReferentialAction,
}

/// Foreign key rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Parse a catalog rule such as `CASCADE` or `SET NULL`. Unknown rules are `NO ACTION`.
    pub fn parse(rule: &str) -> Self {
        match rule.trim().to_uppercase().replace('_', " ").as_str() {
            "CASCADE" => ReferentialAction::Cascade,
            "SET NULL" => ReferentialAction::SetNull,
            "SET DEFAULT" => ReferentialAction::SetDefault,
            "RESTRICT" => ReferentialAction::Restrict,
            _ => ReferentialAction::NoAction,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}
