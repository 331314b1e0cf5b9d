//! # firebird-mysql-migrate
//!
//! Firebird to MySQL schema and data migration library.
//!
//! This library provides the migration engine:
//!
//! - **Schema introspection** of the Firebird system catalog
//! - **Type mapping** between Firebird and MySQL, with lossy mappings reported
//! - **DDL synthesis** in foreign-key dependency order, cycles handled by a
//!   separate foreign-key pass
//! - **Streaming transfers** in bounded batches, one transaction per batch,
//!   with row-by-row isolation of bad rows
//! - **Parallel tables** on a bounded, dependency-aware worker pool
//!
//! ## Example
//!
//! ```rust,no_run
//! use firebird_mysql_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.migrate(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", report.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod ddl;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, RunMode, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationPlan, MigrationReport, Orchestrator, RunStatus, TableStatus};
pub use transfer::{BatchResult, RowFailure, TransferConfig, TransferEngine};
