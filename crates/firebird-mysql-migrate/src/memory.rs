//! In-memory source and target.
//!
//! [`InMemorySource`] serves a fabricated catalog and streams rows lazily
//! through the same bounded channel as a live reader. [`InMemoryTarget`]
//! applies generated DDL to a table map and buffers inserts per session
//! until commit, so rollbacks and row-level rejections behave like a
//! transactional database.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::schema::{ColumnSpec, ForeignKeySpec, IndexSpec, TableSpec};
use crate::core::traits::{InsertTarget, ReadOptions, SourceReader, TargetSession, TargetWriter};
use crate::core::value::{Batch, Row, SqlNullType, SqlValue};
use crate::ddl::{DdlKind, DdlStatement};
use crate::error::{MigrateError, Result};

/// Produces the row at a 0-based position.
pub type RowGenerator = Arc<dyn Fn(u64) -> Row + Send + Sync>;

/// Decides whether the target rejects a row; `Some(reason)` rejects.
pub type RowRejector = Arc<dyn Fn(&str, &Row) -> Option<String> + Send + Sync>;

#[derive(Clone)]
enum RowSource {
    Rows(Arc<Vec<Row>>),
    Generated { count: u64, generator: RowGenerator },
}

impl RowSource {
    fn len(&self) -> u64 {
        match self {
            RowSource::Rows(rows) => rows.len() as u64,
            RowSource::Generated { count, .. } => *count,
        }
    }

    fn row(&self, index: u64) -> Row {
        match self {
            RowSource::Rows(rows) => rows[index as usize].clone(),
            RowSource::Generated { generator, .. } => generator(index),
        }
    }
}

struct SourceTable {
    spec: TableSpec,
    rows: RowSource,
}

/// Source backed by fabricated tables.
#[derive(Default)]
pub struct InMemorySource {
    tables: BTreeMap<String, SourceTable>,
    catalog_failure: Option<String>,
    load_failures: BTreeSet<String>,
    read_failures: BTreeMap<String, (u64, String)>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with materialized rows.
    pub fn with_table(mut self, spec: TableSpec, rows: Vec<Row>) -> Self {
        self.tables.insert(
            spec.name.clone(),
            SourceTable {
                spec,
                rows: RowSource::Rows(Arc::new(rows)),
            },
        );
        self
    }

    /// Add a table whose rows are produced on demand while streaming.
    pub fn with_generated_table<F>(mut self, spec: TableSpec, count: u64, generator: F) -> Self
    where
        F: Fn(u64) -> Row + Send + Sync + 'static,
    {
        self.tables.insert(
            spec.name.clone(),
            SourceTable {
                spec,
                rows: RowSource::Generated {
                    count,
                    generator: Arc::new(generator),
                },
            },
        );
        self
    }

    /// Make every catalog query fail.
    pub fn with_catalog_failure(mut self, reason: impl Into<String>) -> Self {
        self.catalog_failure = Some(reason.into());
        self
    }

    /// Make loading one table's metadata fail.
    pub fn with_load_failure(mut self, table: impl Into<String>) -> Self {
        self.load_failures.insert(table.into());
        self
    }

    /// Fail the row stream of `table` after `after_rows` rows.
    pub fn with_read_failure(
        mut self,
        table: impl Into<String>,
        after_rows: u64,
        reason: impl Into<String>,
    ) -> Self {
        self.read_failures
            .insert(table.into(), (after_rows, reason.into()));
        self
    }

    fn table(&self, name: &str) -> Result<&SourceTable> {
        if let Some(reason) = &self.catalog_failure {
            return Err(MigrateError::CatalogRead(reason.clone()));
        }
        if self.load_failures.contains(name) {
            return Err(MigrateError::CatalogRead(format!(
                "metadata for {} is unreadable",
                name
            )));
        }
        self.tables
            .get(name)
            .ok_or_else(|| MigrateError::CatalogRead(format!("table {} not found", name)))
    }
}

#[async_trait]
impl SourceReader for InMemorySource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        if let Some(reason) = &self.catalog_failure {
            return Err(MigrateError::CatalogRead(reason.clone()));
        }
        Ok(self.tables.keys().cloned().collect())
    }

    async fn load_columns(&self, table: &str) -> Result<Vec<ColumnSpec>> {
        Ok(self.table(table)?.spec.columns.clone())
    }

    async fn load_primary_key(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.table(table)?.spec.primary_key.clone())
    }

    async fn load_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeySpec>> {
        Ok(self.table(table)?.spec.foreign_keys.clone())
    }

    async fn load_indexes(&self, table: &str) -> Result<Vec<IndexSpec>> {
        Ok(self.table(table)?.spec.indexes.clone())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(self.table(table)?.rows.len() as i64)
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel(2);

        let table = match self.table(&opts.table) {
            Ok(t) => t,
            Err(e) => {
                // Capacity 2, nothing sent yet
                let _ = tx.try_send(Err(e));
                return rx;
            }
        };

        let positions: Vec<usize> = opts
            .columns
            .iter()
            .filter_map(|c| table.spec.columns.iter().position(|s| s.name == c.name))
            .collect();
        let rows = table.rows.clone();
        let failure = self.read_failures.get(&opts.table).cloned();
        let name = opts.table.clone();
        let batch_size = opts.batch_size.max(1);

        tokio::spawn(async move {
            let total = rows.len();
            let mut batch = Vec::with_capacity(batch_size);

            for index in 0..total {
                if let Some((after, reason)) = &failure {
                    if index == *after {
                        if !batch.is_empty() {
                            let full = std::mem::take(&mut batch);
                            if tx.send(Ok(Batch::new(full))).await.is_err() {
                                return;
                            }
                        }
                        let _ = tx.send(Err(MigrateError::transfer(&name, reason.clone()))).await;
                        return;
                    }
                }

                let row = rows.row(index);
                let projected: Row = positions
                    .iter()
                    .map(|&p| row.get(p).cloned().unwrap_or(SqlValue::Null(SqlNullType::String)))
                    .collect();
                batch.push(projected);

                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if tx.send(Ok(Batch::new(full))).await.is_err() {
                        return;
                    }
                }
            }

            let _ = tx.send(Ok(Batch::new(batch).mark_final())).await;
        });

        rx
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

/// A table held by [`InMemoryTarget`].
#[derive(Debug, Clone, Default)]
pub struct StoredTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub indexes: Vec<String>,
    /// Foreign key name and referenced table.
    pub foreign_keys: Vec<(String, String)>,
}

#[derive(Default)]
struct TargetState {
    tables: BTreeMap<String, StoredTable>,
    executed: Vec<DdlStatement>,
    ddl_failures: BTreeSet<String>,
    unreachable: bool,
}

/// Target backed by a table map.
#[derive(Clone, Default)]
pub struct InMemoryTarget {
    state: Arc<Mutex<TargetState>>,
    rejector: Option<RowRejector>,
}

impl InMemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a table, as if a previous run had built it.
    pub fn with_table(self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.lock().tables.insert(
            name.into(),
            StoredTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                ..StoredTable::default()
            },
        );
        self
    }

    /// Reject rows for which `rejector` returns a reason.
    pub fn with_row_rejector<F>(mut self, rejector: F) -> Self
    where
        F: Fn(&str, &Row) -> Option<String> + Send + Sync + 'static,
    {
        self.rejector = Some(Arc::new(rejector));
        self
    }

    /// Make every DDL statement for `table` (folded name) fail.
    pub fn with_ddl_failure(self, table: impl Into<String>) -> Self {
        self.lock().ddl_failures.insert(table.into());
        self
    }

    /// Refuse new sessions with a connectivity error.
    pub fn with_unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    /// Committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Snapshot of a table.
    pub fn table(&self, table: &str) -> Option<StoredTable> {
        self.lock().tables.get(table).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    /// Every statement executed successfully, in order.
    pub fn executed(&self) -> Vec<DdlStatement> {
        self.lock().executed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TargetWriter for InMemoryTarget {
    async fn open_session(&self) -> Result<Box<dyn TargetSession>> {
        if self.lock().unreachable {
            return Err(MigrateError::Connectivity(
                "in-memory target is unreachable".to_string(),
            ));
        }
        Ok(Box::new(InMemorySession {
            target: self.clone(),
            pending: Vec::new(),
            in_transaction: false,
        }))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.len() as i64)
            .ok_or_else(|| MigrateError::transfer(table, "table doesn't exist"))
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

struct InMemorySession {
    target: InMemoryTarget,
    pending: Vec<(String, Row)>,
    in_transaction: bool,
}

impl InMemorySession {
    fn apply(state: &mut TargetState, stmt: &DdlStatement) -> std::result::Result<(), String> {
        let table = stmt.table.clone().unwrap_or_default();
        if state.ddl_failures.contains(&table) {
            return Err(format!("statement rejected: {}", stmt.sql));
        }

        match &stmt.kind {
            DdlKind::SessionSetting => {}
            DdlKind::DropTable => {
                state.tables.remove(&table);
            }
            DdlKind::CreateTable { columns } => {
                if state.tables.contains_key(&table) {
                    return Err(format!("Table '{}' already exists", table));
                }
                state.tables.insert(
                    table,
                    StoredTable {
                        columns: columns.clone(),
                        ..StoredTable::default()
                    },
                );
            }
            DdlKind::CreateIndex { name } => {
                let stored = state
                    .tables
                    .get_mut(&table)
                    .ok_or_else(|| format!("Table '{}' doesn't exist", table))?;
                if stored.indexes.contains(name) {
                    return Err(format!("Duplicate key name '{}'", name));
                }
                stored.indexes.push(name.clone());
            }
            DdlKind::AddForeignKey { name, references } => {
                if !state.tables.contains_key(references) {
                    return Err(format!(
                        "Failed to open the referenced table '{}'",
                        references
                    ));
                }
                let stored = state
                    .tables
                    .get_mut(&table)
                    .ok_or_else(|| format!("Table '{}' doesn't exist", table))?;
                stored.foreign_keys.push((name.clone(), references.clone()));
            }
        }

        state.executed.push(stmt.clone());
        Ok(())
    }

    fn flush(&mut self) {
        let mut state = self.target.lock();
        for (table, row) in self.pending.drain(..) {
            if let Some(stored) = state.tables.get_mut(&table) {
                stored.rows.push(row);
            }
        }
    }
}

#[async_trait]
impl TargetSession for InMemorySession {
    async fn execute(&mut self, stmt: &DdlStatement) -> Result<()> {
        let mut state = self.target.lock();
        Self::apply(&mut state, stmt)
            .map_err(|m| MigrateError::ddl(stmt.table.clone().unwrap_or_default(), m))
    }

    async fn begin(&mut self) -> Result<()> {
        self.pending.clear();
        self.in_transaction = true;
        Ok(())
    }

    async fn insert_rows(&mut self, target: &InsertTarget, rows: &[Row]) -> Result<u64> {
        let width = {
            let state = self.target.lock();
            let stored = state.tables.get(&target.table).ok_or_else(|| {
                MigrateError::RowInsert(format!("Table '{}' doesn't exist", target.table))
            })?;
            stored.columns.len()
        };

        let mut accepted = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != width {
                return Err(MigrateError::RowInsert(format!(
                    "Column count doesn't match value count ({} vs {})",
                    width,
                    row.len()
                )));
            }
            if let Some(reason) = self.target.rejector.as_ref().and_then(|r| r(&target.table, row)) {
                return Err(MigrateError::RowInsert(reason));
            }
            accepted.push((target.table.clone(), row.clone()));
        }

        let count = accepted.len() as u64;
        self.pending.extend(accepted);
        if !self.in_transaction {
            self.flush();
        }
        Ok(count)
    }

    async fn commit(&mut self) -> Result<()> {
        self.flush();
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.pending.clear();
        self.in_transaction = false;
        Ok(())
    }
}
