//! ODBC-based Firebird source.
//!
//! **Requirements:**
//! - The `odbc` feature must be enabled
//! - The Firebird ODBC driver must be installed and registered:
//!   - Windows: the Firebird ODBC installer
//!   - Linux: `libOdbcFb.so` registered in `odbcinst.ini`
//!
//! Values are fetched as text, or as raw bytes for binary columns; typed
//! parsing happens in the transfer converter so a malformed value fails one
//! row, not the table.

use std::sync::Arc;

use async_trait::async_trait;
use odbc_api::{buffers::TextRowSet, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::catalog::{self, CatalogRow};
use crate::config::SourceConfig;
use crate::core::schema::{ColumnSpec, ForeignKeySpec, IndexSpec};
use crate::core::traits::{ReadOptions, SourceReader};
use crate::core::value::{Batch, Row, SqlNullType, SqlValue};
use crate::error::{MigrateError, Result};

/// Rows fetched per ODBC round trip for catalog queries.
const CATALOG_FETCH_ROWS: usize = 1000;

/// Upper bound for one text value in catalog queries (default sources are blobs).
const CATALOG_MAX_STR: usize = 4096;

/// Smallest text buffer per value in bulk fetches.
const MIN_VALUE_BYTES: usize = 64;

/// Per-fetch buffer budget for data transfer.
const DATA_BUFFER_BYTES: usize = 64 * 1024 * 1024;

/// Firebird source reader over ODBC.
pub struct FirebirdReader {
    env: Arc<Environment>,
    connection_string: String,
    /// Serializes catalog queries; ODBC handles are not shared across threads.
    conn_mutex: Mutex<()>,
}

impl FirebirdReader {
    /// Create a reader and verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns `MigrateError::Connectivity` if the ODBC environment cannot be
    /// created, the driver is missing, or the server rejects the login.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        let env = Environment::new().map_err(|e| {
            MigrateError::Connectivity(format!(
                "Failed to create ODBC environment: {}. \
                 Make sure the Firebird ODBC driver is installed.",
                e
            ))
        })?;

        let connection_string = config.connection_string();

        debug!(
            "ODBC connection string (credentials hidden): Driver={{{}}};Dbname={}/{}:{};...",
            config.odbc_driver, config.host, config.port, config.database
        );

        {
            let conn = env
                .connect_with_connection_string(&connection_string, ConnectionOptions::default())
                .map_err(|e| {
                    MigrateError::Connectivity(format!(
                        "Failed to connect to Firebird {}:{}/{}: {}",
                        config.host, config.port, config.database, e
                    ))
                })?;

            conn.execute("SELECT 1 FROM RDB$DATABASE", ()).map_err(|e| {
                MigrateError::Connectivity(format!("Firebird connectivity check failed: {}", e))
            })?;
        }

        info!(
            "Connected to Firebird via ODBC: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            env: Arc::new(env),
            connection_string,
            conn_mutex: Mutex::new(()),
        })
    }

    /// Execute a catalog query and return rows as text.
    fn execute_query(&self, sql: &str) -> Result<Vec<CatalogRow>> {
        let conn = connect(&self.env, &self.connection_string)?;
        let mut rows = Vec::new();

        if let Some(mut cursor) = conn.execute(sql, ()).map_err(|e| {
            MigrateError::CatalogRead(format!("ODBC query failed: {} - SQL: {}", e, sql))
        })? {
            let num_cols = cursor.num_result_cols().map_err(|e| {
                MigrateError::CatalogRead(format!("Failed to get column count: {}", e))
            })? as usize;

            let mut buffers =
                TextRowSet::for_cursor(CATALOG_FETCH_ROWS, &mut cursor, Some(CATALOG_MAX_STR))
                    .map_err(|e| {
                        MigrateError::CatalogRead(format!("Failed to create row buffer: {}", e))
                    })?;

            let mut row_cursor = cursor.bind_buffer(&mut buffers).map_err(|e| {
                MigrateError::CatalogRead(format!("Failed to bind buffer: {}", e))
            })?;

            while let Some(batch) = row_cursor.fetch().map_err(|e| {
                MigrateError::CatalogRead(format!("Failed to fetch rows: {}", e))
            })? {
                for row_idx in 0..batch.num_rows() {
                    let row = (0..num_cols)
                        .map(|col_idx| {
                            batch
                                .at(col_idx, row_idx)
                                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                        })
                        .collect();
                    rows.push(row);
                }
            }
        }

        Ok(rows)
    }

    async fn query(&self, sql: &str) -> Result<Vec<CatalogRow>> {
        let _lock = self.conn_mutex.lock().await;
        self.execute_query(sql)
    }
}

fn connect<'env>(env: &'env Environment, connection_string: &str) -> Result<odbc_api::Connection<'env>> {
    env.connect_with_connection_string(connection_string, ConnectionOptions::default())
        .map_err(|e| MigrateError::Connectivity(format!("ODBC connection failed: {}", e)))
}

#[async_trait]
impl SourceReader for FirebirdReader {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = self.query(catalog::LIST_TABLES_SQL).await?;
        let mut tables = catalog::parse_names(&rows);
        tables.sort();
        Ok(tables)
    }

    async fn load_columns(&self, table: &str) -> Result<Vec<ColumnSpec>> {
        let rows = self.query(&catalog::columns_sql(table)).await?;
        catalog::parse_columns(table, &rows)
    }

    async fn load_primary_key(&self, table: &str) -> Result<Vec<String>> {
        let rows = self.query(&catalog::primary_key_sql(table)).await?;
        Ok(catalog::parse_names(&rows))
    }

    async fn load_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeySpec>> {
        let rows = self.query(&catalog::foreign_keys_sql(table)).await?;
        catalog::parse_foreign_keys(&rows)
    }

    async fn load_indexes(&self, table: &str) -> Result<Vec<IndexSpec>> {
        let rows = self.query(&catalog::indexes_sql(table)).await?;
        catalog::parse_indexes(&rows)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let rows = self.query(&catalog::row_count_sql(table)).await?;
        Ok(rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_deref())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0))
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Batch>> {
        // Two batches in flight bound memory while the writer works
        let (tx, rx) = mpsc::channel(2);
        let env = Arc::clone(&self.env);
        let connection_string = self.connection_string.clone();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = stream_rows(&env, &connection_string, &opts, &tx) {
                warn!("Read of {} failed: {}", opts.table, e);
                let _ = tx.blocking_send(Err(e));
            }
        });

        rx
    }

    fn db_type(&self) -> &str {
        "firebird"
    }

    async fn close(&self) {
        // Connections are opened per call and dropped on return
    }
}

/// Blocking forward-only scan. Returns early (Ok) when the receiver is gone.
///
/// Tables with BLOB or binary columns are read one row at a time with each
/// value fetched in chunks, so no value size limit applies. Other tables
/// are fetched in bulk into buffers sized from the declared column lengths.
fn stream_rows(
    env: &Environment,
    connection_string: &str,
    opts: &ReadOptions,
    tx: &mpsc::Sender<Result<Batch>>,
) -> Result<()> {
    let conn = connect(env, connection_string)?;
    let sql = catalog::select_rows_sql(&opts.table, &opts.columns);

    let Some(mut cursor) = conn
        .execute(&sql, ())
        .map_err(|e| read_err(opts, "Query failed", e))?
    else {
        let _ = tx.blocking_send(Ok(Batch::new(Vec::new()).mark_final()));
        return Ok(());
    };

    let mut batcher = Batcher::new(opts.batch_size, tx);
    let unbounded = opts
        .columns
        .iter()
        .any(|c| c.data_type.starts_with("BLOB") || c.is_binary());
    let completed = if unbounded {
        read_row_by_row(&mut cursor, opts, &mut batcher)?
    } else {
        read_buffered(cursor, opts, &mut batcher)?
    };

    if completed {
        batcher.finish();
    }
    Ok(())
}

fn read_err(opts: &ReadOptions, what: &str, e: odbc_api::Error) -> MigrateError {
    MigrateError::transfer(&opts.table, format!("{}: {}", what, e))
}

/// Returns false when the receiver hung up.
fn read_row_by_row(
    cursor: &mut impl Cursor,
    opts: &ReadOptions,
    batcher: &mut Batcher<'_>,
) -> Result<bool> {
    while let Some(mut row) = cursor
        .next_row()
        .map_err(|e| read_err(opts, "Failed to fetch row", e))?
    {
        let mut values = Vec::with_capacity(opts.columns.len());
        for (idx, col) in opts.columns.iter().enumerate() {
            let col_num = (idx + 1) as u16;
            let mut buf = Vec::new();
            let value = if col.is_binary() {
                let present = row
                    .get_binary(col_num, &mut buf)
                    .map_err(|e| read_err(opts, &format!("Failed to read {}", col.name), e))?;
                if present {
                    SqlValue::from(buf)
                } else {
                    SqlValue::Null(SqlNullType::Bytes)
                }
            } else {
                let present = row
                    .get_text(col_num, &mut buf)
                    .map_err(|e| read_err(opts, &format!("Failed to read {}", col.name), e))?;
                if present {
                    text_value(buf)
                } else {
                    SqlValue::Null(SqlNullType::String)
                }
            };
            values.push(value);
        }
        if !batcher.push(values) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Returns false when the receiver hung up.
fn read_buffered(
    mut cursor: impl Cursor,
    opts: &ReadOptions,
    batcher: &mut Batcher<'_>,
) -> Result<bool> {
    // Up to 4 bytes per character; numbers and dates need far less than the floor
    let max_lens: Vec<usize> = opts
        .columns
        .iter()
        .map(|c| (c.max_length.max(0) as usize * 4).max(MIN_VALUE_BYTES))
        .collect();
    let row_bytes: usize = max_lens.iter().sum();
    let fetch_rows = (DATA_BUFFER_BYTES / row_bytes.max(1)).clamp(1, opts.batch_size.max(1));

    let mut buffers = TextRowSet::from_max_str_lens(fetch_rows, max_lens)
        .map_err(|e| read_err(opts, "Failed to create row buffer", e))?;
    let mut row_cursor = cursor
        .bind_buffer(&mut buffers)
        .map_err(|e| read_err(opts, "Failed to bind buffer", e))?;

    let num_cols = opts.columns.len();
    while let Some(fetched) = row_cursor
        .fetch_with_truncation_check(true)
        .map_err(|e| read_err(opts, "Failed to fetch rows", e))?
    {
        for row_idx in 0..fetched.num_rows() {
            let row: Row = (0..num_cols)
                .map(|col_idx| match fetched.at(col_idx, row_idx) {
                    None => SqlValue::Null(SqlNullType::String),
                    Some(bytes) => text_value(bytes.to_vec()),
                })
                .collect();
            if !batcher.push(row) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Text as sent by the driver. Bytes that are not UTF-8 are passed on
/// untouched so the converter fails that row.
fn text_value(bytes: Vec<u8>) -> SqlValue<'static> {
    match String::from_utf8(bytes) {
        Ok(s) => SqlValue::from(s),
        Err(e) => SqlValue::from(e.into_bytes()),
    }
}

/// Groups rows into batches on the transfer channel.
struct Batcher<'a> {
    batch_size: usize,
    pending: Vec<Row>,
    tx: &'a mpsc::Sender<Result<Batch>>,
}

impl<'a> Batcher<'a> {
    fn new(batch_size: usize, tx: &'a mpsc::Sender<Result<Batch>>) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
            tx,
        }
    }

    /// False once the receiver is gone.
    fn push(&mut self, row: Row) -> bool {
        self.pending.push(row);
        if self.pending.len() < self.batch_size {
            return true;
        }
        let rows = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        self.tx.blocking_send(Ok(Batch::new(rows))).is_ok()
    }

    fn finish(self) {
        let _ = self.tx.blocking_send(Ok(Batch::new(self.pending).mark_final()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_value_keeps_invalid_utf8_as_bytes() {
        assert_eq!(text_value(b"Ana".to_vec()), SqlValue::from("Ana".to_string()));
        assert_eq!(
            text_value(vec![0x41, 0xc3, 0x28]),
            SqlValue::from(vec![0x41, 0xc3, 0x28])
        );
    }

    #[test]
    fn test_batcher_splits_rows_and_marks_last_batch() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut batcher = Batcher::new(2, &tx);
        for i in 0..5 {
            assert!(batcher.push(vec![SqlValue::I32(i)]));
        }
        batcher.finish();
        drop(tx);

        let mut sizes = Vec::new();
        let mut last = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            let batch = batch.unwrap();
            sizes.push(batch.rows.len());
            last.push(batch.is_last);
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(last, vec![false, false, true]);
    }

    #[test]
    fn test_batcher_stops_when_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let mut batcher = Batcher::new(1, &tx);
        assert!(!batcher.push(vec![SqlValue::I32(1)]));
    }
}
