//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (Firebird).
    #[serde(default, alias = "firebird")]
    pub source: SourceConfig,

    /// Target database configuration (MySQL).
    #[serde(default, alias = "mysql")]
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }

    /// Run mode derived from the structure/data switches.
    pub fn run_mode(&self) -> RunMode {
        match (
            self.migration.transfer_structure,
            self.migration.transfer_data,
        ) {
            (true, false) => RunMode::StructureOnly,
            (false, true) => RunMode::DataOnly,
            _ => RunMode::Full,
        }
    }
}

/// Source database (Firebird) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host (default: "localhost").
    #[serde(default = "default_localhost")]
    pub host: String,

    /// Database port (default: 3050).
    #[serde(default = "default_firebird_port")]
    pub port: u16,

    /// Database path or alias on the server.
    #[serde(default)]
    pub database: String,

    /// Username (default: "SYSDBA").
    #[serde(default = "default_sysdba")]
    pub user: String,

    /// Password.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Connection character set (default: "UTF8").
    #[serde(default = "default_utf8")]
    pub charset: String,

    /// ODBC driver name used to reach the server.
    #[serde(default = "default_odbc_driver")]
    pub odbc_driver: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_firebird_port(),
            database: String::new(),
            user: default_sysdba(),
            password: String::new(),
            charset: default_utf8(),
            odbc_driver: default_odbc_driver(),
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("charset", &self.charset)
            .field("odbc_driver", &self.odbc_driver)
            .finish()
    }
}

/// Target database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host (default: "localhost").
    #[serde(default = "default_localhost")]
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username (default: "root").
    #[serde(default = "default_root")]
    pub user: String,

    /// Password.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Connection character set (default: "utf8mb4").
    #[serde(default = "default_utf8mb4")]
    pub charset: String,

    /// SSL mode (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,

    /// Create the target database when it does not exist (default: true).
    #[serde(default = "default_true")]
    pub create_database: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_mysql_port(),
            database: String::new(),
            user: default_root(),
            password: String::new(),
            charset: default_utf8mb4(),
            ssl_mode: default_prefer(),
            create_database: true,
        }
    }
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("charset", &self.charset)
            .field("ssl_mode", &self.ssl_mode)
            .field("create_database", &self.create_database)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of parallel table workers. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Tables to migrate. Empty means every user table.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Drop planned target tables before creating them.
    #[serde(default)]
    pub drop_tables: bool,

    /// Create target tables, indexes and foreign keys (default: true).
    #[serde(default = "default_true")]
    pub transfer_structure: bool,

    /// Copy row data (default: true).
    #[serde(default = "default_true")]
    pub transfer_data: bool,

    /// Fold all identifiers to lowercase.
    #[serde(default)]
    pub lowercase: bool,

    /// What to do with foreign keys pointing outside the selected tables.
    #[serde(default)]
    pub referenced_tables: ReferencedTablePolicy,

    /// Create secondary indexes (default: true).
    #[serde(default = "default_true")]
    pub create_indexes: bool,

    /// Create foreign keys (default: true).
    #[serde(default = "default_true")]
    pub create_foreign_keys: bool,

    /// Handling of column defaults that have no MySQL equivalent.
    #[serde(default)]
    pub default_values: DefaultValuePolicy,

    /// Map SMALLINT columns on domains named like `*BOOL*` to TINYINT(1).
    #[serde(default)]
    pub detect_boolean_domains: bool,

    /// Strip the trailing blanks Firebird pads CHAR values with (default: true).
    #[serde(default = "default_true")]
    pub trim_char_padding: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: None,
            tables: Vec::new(),
            drop_tables: false,
            transfer_structure: true,
            transfer_data: true,
            lowercase: false,
            referenced_tables: ReferencedTablePolicy::default(),
            create_indexes: true,
            create_foreign_keys: true,
            default_values: DefaultValuePolicy::default(),
            detect_boolean_domains: false,
            trim_char_padding: true,
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        // Workers: cores - 2, but at least 2 and at most 16
        if self.workers.is_none() {
            let workers = resources.cpu_cores.saturating_sub(2).clamp(2, 16);
            self.workers = Some(workers);
        }

        info!(
            "Auto-tuned config: workers={}, batch_size={}",
            self.get_workers(),
            self.batch_size
        );

        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }
}

/// Run mode selected from configuration and CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Structure and data.
    #[default]
    Full,

    /// DDL only.
    StructureOnly,

    /// Rows only; the target schema must already exist.
    DataOnly,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::StructureOnly => write!(f, "structure-only"),
            RunMode::DataOnly => write!(f, "data-only"),
        }
    }
}

/// Policy for foreign keys that reference tables outside the selected set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencedTablePolicy {
    /// Pull referenced tables into the plan.
    #[default]
    Include,

    /// Stop with a schema inconsistency error.
    Fail,

    /// Keep the selection and leave those foreign keys out.
    Ignore,
}

/// Policy for column defaults without a target equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValuePolicy {
    /// Never emit DEFAULT clauses.
    Drop,

    /// Translate what has an equivalent, drop the rest with a warning.
    #[default]
    Approximate,

    /// Fail the table when a default cannot be translated.
    Fail,
}

fn default_localhost() -> String {
    "localhost".to_string()
}

fn default_firebird_port() -> u16 {
    3050
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_sysdba() -> String {
    "SYSDBA".to_string()
}

fn default_root() -> String {
    "root".to_string()
}

fn default_utf8() -> String {
    "UTF8".to_string()
}

fn default_utf8mb4() -> String {
    "utf8mb4".to_string()
}

fn default_odbc_driver() -> String {
    "Firebird/InterBase(r) driver".to_string()
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}
