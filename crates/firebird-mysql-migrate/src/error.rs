//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when a database could not be reached.
pub const EXIT_CONNECTIVITY_ERROR: u8 = 2;
/// Exit code for catalog, mapping, and schema consistency errors.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code when one or more tables or rows failed.
pub const EXIT_TRANSFER_ERROR: u8 = 4;
/// Exit code when the run was interrupted.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A database could not be reached or the connection was lost.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Reading the source system catalog failed.
    #[error("Catalog read failed: {0}")]
    CatalogRead(String),

    /// A source column type has no target mapping.
    #[error("Unsupported type '{source_type}' for column {table}.{column}")]
    UnsupportedType {
        table: String,
        column: String,
        source_type: String,
    },

    /// Foreign keys point outside the selected tables and policy forbids adding them.
    #[error("Schema inconsistency: {0}")]
    SchemaInconsistency(String),

    /// Target tables expected by a data-only run are absent.
    #[error("Target schema missing tables: {}", tables.join(", "))]
    SchemaMissing { tables: Vec<String> },

    /// A single value could not be converted to its target representation.
    #[error("Row conversion failed: {0}")]
    RowConversion(String),

    /// The target rejected a single row.
    #[error("Row insert failed: {0}")]
    RowInsert(String),

    /// A DDL statement failed on the target.
    #[error("DDL failed for table {table}: {message}")]
    Ddl { table: String, message: String },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Target database error
    #[error("Target database error: {0}")]
    Target(#[from] mysql_async::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Ddl error
    pub fn ddl(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Ddl {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an UnsupportedType error
    pub fn unsupported(
        table: impl Into<String>,
        column: impl Into<String>,
        source_type: impl Into<String>,
    ) -> Self {
        MigrateError::UnsupportedType {
            table: table.into(),
            column: column.into(),
            source_type: source_type.into(),
        }
    }

    /// Errors that end the whole run rather than a single table or row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MigrateError::Connectivity(_) | MigrateError::Cancelled)
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connectivity(_) | MigrateError::Target(_) => EXIT_CONNECTIVITY_ERROR,
            MigrateError::CatalogRead(_)
            | MigrateError::UnsupportedType { .. }
            | MigrateError::SchemaInconsistency(_)
            | MigrateError::SchemaMissing { .. }
            | MigrateError::Ddl { .. } => EXIT_SCHEMA_ERROR,
            MigrateError::RowConversion(_)
            | MigrateError::RowInsert(_)
            | MigrateError::Transfer { .. }
            | MigrateError::Json(_) => EXIT_TRANSFER_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
