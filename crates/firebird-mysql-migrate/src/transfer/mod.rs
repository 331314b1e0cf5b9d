//! Data transfer engine.
//!
//! One call to [`TransferEngine::transfer`] moves one table: rows stream
//! from the source in bounded batches, each batch is converted and written
//! inside one target transaction. When a batch fails, its rows are retried
//! one transaction each so only the offending rows are lost; their ordinals
//! and reasons land in the [`BatchResult`].
//!
//! Row-level problems never escape this module. Fatal errors (lost
//! connection) are returned as `Err`; anything else that stops a table early
//! is reported through [`TableTransfer::error`].

mod convert;

pub use convert::{convert_value, RowConverter};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::traits::{InsertTarget, ReadOptions, SourceReader, TargetSession, TargetWriter};
use crate::core::value::Row;
use crate::ddl::MappedTable;
use crate::error::{MigrateError, Result};

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Rows per batch and per target transaction.
    pub batch_size: usize,
    /// Strip trailing blanks from CHAR values.
    pub trim_char_padding: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            trim_char_padding: true,
        }
    }
}

/// A row that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    /// 1-based position of the row in the table's read order.
    pub ordinal: u64,
    pub reason: String,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub table: String,
    pub batch_index: usize,
    pub rows_attempted: u64,
    pub rows_succeeded: u64,
    pub failures: Vec<RowFailure>,
}

/// Outcome of one table.
#[derive(Debug, Clone, Default)]
pub struct TableTransfer {
    pub table: String,
    pub batches: Vec<BatchResult>,
    pub rows_attempted: u64,
    pub rows_succeeded: u64,
    pub rows_failed: u64,
    /// Stopped by cancellation before the source was exhausted.
    pub cancelled: bool,
    /// Table-level error that stopped the transfer early.
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl TableTransfer {
    /// Every row failure, in ordinal order.
    pub fn failures(&self) -> impl Iterator<Item = &RowFailure> {
        self.batches.iter().flat_map(|b| b.failures.iter())
    }

    fn record(&mut self, batch: BatchResult) {
        self.rows_attempted += batch.rows_attempted;
        self.rows_succeeded += batch.rows_succeeded;
        self.rows_failed += batch.failures.len() as u64;
        self.batches.push(batch);
    }
}

/// Transfer engine for moving rows of mapped tables.
pub struct TransferEngine {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(source: Arc<dyn SourceReader>, target: Arc<dyn TargetWriter>, config: TransferConfig) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    /// Transfer one table.
    ///
    /// The worker holds one source stream and one target session for the
    /// whole table. Cancellation is honored between batches; a batch in
    /// flight is always committed or rolled back before returning.
    pub async fn transfer(&self, table: &MappedTable, cancel: &CancellationToken) -> Result<TableTransfer> {
        let name = table.source.name.clone();
        let start = Instant::now();
        let mut outcome = TableTransfer {
            table: name.clone(),
            ..TableTransfer::default()
        };

        info!("Starting transfer for {} (batch size {})", name, self.config.batch_size);

        let mut session = match self.target.open_session().await {
            Ok(s) => s,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                outcome.error = Some(e.to_string());
                return Ok(outcome);
            }
        };

        let insert = table.insert_target();
        let converter = RowConverter::new(
            table.kinds(),
            table.columns.iter().map(|c| c.source_name.clone()).collect(),
            self.config.trim_char_padding,
        );

        let mut rx = self.source.read_table(ReadOptions {
            table: name.clone(),
            columns: table.source.columns.clone(),
            batch_size: self.config.batch_size.max(1),
        });

        let mut batch_index = 0usize;
        let mut next_ordinal = 1u64;

        loop {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                item = rx.recv() => item,
            };

            let batch = match item {
                None => break,
                Some(Ok(batch)) => batch,
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => {
                    warn!("{}: read failed after {} rows: {}", name, outcome.rows_attempted, e);
                    outcome.error = Some(e.to_string());
                    break;
                }
            };

            let is_last = batch.is_last;
            if !batch.is_empty() {
                let rows = batch.rows.len() as u64;
                let result = self
                    .write_batch(
                        session.as_mut(),
                        &insert,
                        &converter,
                        batch.rows,
                        batch_index,
                        next_ordinal,
                    )
                    .await?;
                next_ordinal += rows;
                batch_index += 1;
                outcome.record(result);
            }

            if is_last {
                break;
            }
        }

        outcome.elapsed = start.elapsed();
        let secs = outcome.elapsed.as_secs_f64();
        let rows_per_sec = if secs > 0.0 {
            (outcome.rows_succeeded as f64 / secs) as u64
        } else {
            0
        };

        info!(
            "{}: transferred {} of {} rows in {:?} ({} rows/sec, {} failed)",
            name,
            outcome.rows_succeeded,
            outcome.rows_attempted,
            outcome.elapsed,
            rows_per_sec,
            outcome.rows_failed
        );

        Ok(outcome)
    }

    /// Convert and write one batch.
    async fn write_batch(
        &self,
        session: &mut dyn TargetSession,
        insert: &InsertTarget,
        converter: &RowConverter,
        rows: Vec<Row>,
        batch_index: usize,
        first_ordinal: u64,
    ) -> Result<BatchResult> {
        let mut result = BatchResult {
            table: insert.table.clone(),
            batch_index,
            rows_attempted: rows.len() as u64,
            rows_succeeded: 0,
            failures: Vec::new(),
        };

        let mut ordinals = Vec::with_capacity(rows.len());
        let mut converted = Vec::with_capacity(rows.len());
        for (offset, row) in rows.into_iter().enumerate() {
            let ordinal = first_ordinal + offset as u64;
            match converter.convert(row) {
                Ok(r) => {
                    ordinals.push(ordinal);
                    converted.push(r);
                }
                Err(reason) => {
                    let reason = MigrateError::RowConversion(reason).to_string();
                    warn!("{}: row {}: {}", insert.table, ordinal, reason);
                    result.failures.push(RowFailure { ordinal, reason });
                }
            }
        }

        if converted.is_empty() {
            return Ok(result);
        }

        match insert_in_transaction(session, insert, &converted).await {
            Ok(()) => {
                result.rows_succeeded = converted.len() as u64;
                debug!(
                    "{}: batch {} committed ({} rows)",
                    insert.table, batch_index, result.rows_succeeded
                );
                return Ok(result);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(
                    "{}: batch {} failed ({}), retrying row by row",
                    insert.table, batch_index, e
                );
            }
        }

        for (ordinal, row) in ordinals.into_iter().zip(converted) {
            match insert_in_transaction(session, insert, std::slice::from_ref(&row)).await {
                Ok(()) => result.rows_succeeded += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let reason = match e {
                        MigrateError::RowInsert(_) => e.to_string(),
                        other => MigrateError::RowInsert(other.to_string()).to_string(),
                    };
                    warn!("{}: row {}: {}", insert.table, ordinal, reason);
                    result.failures.push(RowFailure { ordinal, reason });
                }
            }
        }

        result.failures.sort_by_key(|f| f.ordinal);
        Ok(result)
    }
}

/// Write rows inside one transaction, rolling back on any failure.
async fn insert_in_transaction(
    session: &mut dyn TargetSession,
    insert: &InsertTarget,
    rows: &[Row],
) -> Result<()> {
    session.begin().await?;

    let written = match session.insert_rows(insert, rows).await {
        Ok(_) => session.commit().await,
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        if let Err(rollback_err) = session.rollback().await {
            debug!("{}: rollback failed: {}", insert.table, rollback_err);
            if rollback_err.is_fatal() {
                return Err(rollback_err);
            }
        }
        return Err(e);
    }
    Ok(())
}
