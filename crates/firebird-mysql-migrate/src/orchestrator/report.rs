//! Migration report.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::RunMode;
use crate::error::{Result, EXIT_CANCELLED, EXIT_TRANSFER_ERROR};
use crate::transfer::TableTransfer;

/// Final state of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    Completed,
    Failed,
    SkippedDueToDependencyFailure,
    Cancelled,
}

/// Final state of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table completed and every row was written.
    Completed,
    /// Every table completed but some rows were rejected.
    CompletedWithErrors,
    /// At least one table failed or was skipped.
    Failed,
    Cancelled,
}

/// Per-table line of the report.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    /// Source table name.
    pub table: String,
    /// Target table name.
    pub target: String,
    pub status: TableStatus,
    pub rows_attempted: u64,
    pub rows_transferred: u64,
    pub rows_failed: u64,
    pub batches: usize,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failed table this one depends on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
}

impl TableReport {
    fn new(table: &str, target: &str) -> Self {
        Self {
            table: table.to_string(),
            target: target.to_string(),
            status: TableStatus::Pending,
            rows_attempted: 0,
            rows_transferred: 0,
            rows_failed: 0,
            batches: 0,
            duration_seconds: 0.0,
            error: None,
            blocked_by: None,
        }
    }
}

/// One failure, table-level or row-level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureEntry {
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
    /// 1-based row ordinal within the table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<u64>,
    pub reason: String,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,
    pub status: RunStatus,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Average throughput (rows/second).
    pub rows_per_second: i64,

    pub tables_total: usize,
    pub tables_completed: usize,
    pub tables_failed: usize,
    pub tables_skipped: usize,
    pub tables_cancelled: usize,

    pub rows_attempted: u64,
    pub rows_transferred: u64,
    pub rows_failed: u64,

    pub tables: Vec<TableReport>,
    pub failures: Vec<FailureEntry>,
    /// Lossy mappings, dropped defaults and constraints.
    pub warnings: Vec<String>,
}

impl MigrationReport {
    pub(crate) fn new(run_id: String, mode: RunMode, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            status: RunStatus::Completed,
            mode,
            started_at,
            completed_at: started_at,
            duration_seconds: 0.0,
            rows_per_second: 0,
            tables_total: 0,
            tables_completed: 0,
            tables_failed: 0,
            tables_skipped: 0,
            tables_cancelled: 0,
            rows_attempted: 0,
            rows_transferred: 0,
            rows_failed: 0,
            tables: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Register a table; the first registration wins.
    pub(crate) fn add_table(&mut self, table: &str, target: &str) {
        if self.find(table).is_none() {
            self.tables.push(TableReport::new(table, target));
        }
    }

    /// Look up a table line by source name.
    pub fn table(&self, table: &str) -> Option<&TableReport> {
        self.find(table).map(|i| &self.tables[i])
    }

    fn find(&self, table: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.table == table)
    }

    fn entry(&mut self, table: &str) -> &mut TableReport {
        let index = match self.find(table) {
            Some(i) => i,
            None => {
                self.tables.push(TableReport::new(table, table));
                self.tables.len() - 1
            }
        };
        &mut self.tables[index]
    }

    pub(crate) fn mark_failed(&mut self, table: &str, reason: impl Into<String>) {
        let reason = reason.into();
        let entry = self.entry(table);
        entry.status = TableStatus::Failed;
        if entry.error.is_none() {
            entry.error = Some(reason.clone());
        }
        self.failures.push(FailureEntry {
            table: table.to_string(),
            batch: None,
            row: None,
            reason,
        });
    }

    pub(crate) fn mark_skipped(&mut self, table: &str, blocked_by: &str) {
        let entry = self.entry(table);
        entry.status = TableStatus::SkippedDueToDependencyFailure;
        entry.blocked_by = Some(blocked_by.to_string());
        self.failures.push(FailureEntry {
            table: table.to_string(),
            batch: None,
            row: None,
            reason: format!("skipped: depends on failed table {}", blocked_by),
        });
    }

    pub(crate) fn mark_cancelled(&mut self, table: &str) {
        let entry = self.entry(table);
        if entry.status == TableStatus::Pending {
            entry.status = TableStatus::Cancelled;
        }
    }

    /// Fold a table transfer into the report.
    pub(crate) fn record_transfer(&mut self, transfer: &TableTransfer) {
        let entry = self.entry(&transfer.table);
        entry.rows_attempted += transfer.rows_attempted;
        entry.rows_transferred += transfer.rows_succeeded;
        entry.rows_failed += transfer.rows_failed;
        entry.batches += transfer.batches.len();
        entry.duration_seconds += transfer.elapsed.as_secs_f64();
        entry.status = if transfer.error.is_some() {
            TableStatus::Failed
        } else if transfer.cancelled {
            TableStatus::Cancelled
        } else {
            TableStatus::Completed
        };

        for batch in &transfer.batches {
            for failure in &batch.failures {
                self.failures.push(FailureEntry {
                    table: transfer.table.clone(),
                    batch: Some(batch.batch_index),
                    row: Some(failure.ordinal),
                    reason: failure.reason.clone(),
                });
            }
        }
        if let Some(error) = &transfer.error {
            self.entry(&transfer.table).error = Some(error.clone());
            self.failures.push(FailureEntry {
                table: transfer.table.clone(),
                batch: None,
                row: None,
                reason: error.clone(),
            });
        }
    }

    pub(crate) fn add_warnings<I: IntoIterator<Item = String>>(&mut self, warnings: I) {
        for w in warnings {
            if !self.warnings.contains(&w) {
                self.warnings.push(w);
            }
        }
    }

    /// Compute totals and the run status.
    pub(crate) fn finish(&mut self, completed_at: DateTime<Utc>, cancelled: bool) {
        for t in &mut self.tables {
            if t.status == TableStatus::Pending {
                t.status = if cancelled {
                    TableStatus::Cancelled
                } else {
                    TableStatus::Completed
                };
            }
        }

        self.completed_at = completed_at;
        self.duration_seconds =
            (completed_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;

        let count = |s: TableStatus| self.tables.iter().filter(|t| t.status == s).count();
        self.tables_total = self.tables.len();
        self.tables_completed = count(TableStatus::Completed);
        self.tables_failed = count(TableStatus::Failed);
        self.tables_skipped = count(TableStatus::SkippedDueToDependencyFailure);
        self.tables_cancelled = count(TableStatus::Cancelled);

        self.rows_attempted = self.tables.iter().map(|t| t.rows_attempted).sum();
        self.rows_transferred = self.tables.iter().map(|t| t.rows_transferred).sum();
        self.rows_failed = self.tables.iter().map(|t| t.rows_failed).sum();

        self.rows_per_second = if self.duration_seconds > 0.0 {
            (self.rows_transferred as f64 / self.duration_seconds) as i64
        } else {
            0
        };

        self.status = if cancelled || self.tables_cancelled > 0 {
            RunStatus::Cancelled
        } else if self.tables_failed > 0 || self.tables_skipped > 0 {
            RunStatus::Failed
        } else if self.rows_failed > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };
    }

    /// Whether anything failed, at table or row level.
    pub fn has_failures(&self) -> bool {
        self.status != RunStatus::Completed
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::Completed => 0,
            RunStatus::Cancelled => EXIT_CANCELLED,
            RunStatus::CompletedWithErrors | RunStatus::Failed => EXIT_TRANSFER_ERROR,
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let status = match self.status {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed with errors",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };

        let mut out = String::new();
        let _ = writeln!(out, "Migration {} ({} mode, run {})", status, self.mode, self.run_id);
        let _ = writeln!(
            out,
            "Tables: {} total, {} completed, {} failed, {} skipped, {} cancelled",
            self.tables_total,
            self.tables_completed,
            self.tables_failed,
            self.tables_skipped,
            self.tables_cancelled
        );
        let _ = writeln!(
            out,
            "Rows: {} transferred, {} failed, in {:.1}s ({} rows/s)",
            self.rows_transferred, self.rows_failed, self.duration_seconds, self.rows_per_second
        );

        if !self.failures.is_empty() {
            let _ = writeln!(out, "Failures:");
            for f in &self.failures {
                match f.row {
                    Some(row) => {
                        let _ = writeln!(out, "  {} row {}: {}", f.table, row, f.reason);
                    }
                    None => {
                        let _ = writeln!(out, "  {}: {}", f.table, f.reason);
                    }
                }
            }
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(out, "Warnings:");
            for w in &self.warnings {
                let _ = writeln!(out, "  {}", w);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{BatchResult, RowFailure};
    use std::time::Duration;

    fn transfer(table: &str, ok: u64, failed: &[u64]) -> TableTransfer {
        TableTransfer {
            table: table.to_string(),
            batches: vec![BatchResult {
                table: table.to_lowercase(),
                batch_index: 0,
                rows_attempted: ok + failed.len() as u64,
                rows_succeeded: ok,
                failures: failed
                    .iter()
                    .map(|&ordinal| RowFailure {
                        ordinal,
                        reason: "too long".to_string(),
                    })
                    .collect(),
            }],
            rows_attempted: ok + failed.len() as u64,
            rows_succeeded: ok,
            rows_failed: failed.len() as u64,
            cancelled: false,
            error: None,
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_clean_run_completes() {
        let start = Utc::now();
        let mut report = MigrationReport::new("r1".into(), RunMode::Full, start);
        report.add_table("CUSTOMER", "CUSTOMER");
        report.record_transfer(&transfer("CUSTOMER", 10, &[]));
        report.finish(start + chrono::Duration::seconds(2), false);

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.rows_transferred, 10);
        assert_eq!(report.rows_per_second, 5);
        assert_eq!(report.exit_code(), 0);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_row_failures_are_enumerated() {
        let start = Utc::now();
        let mut report = MigrationReport::new("r2".into(), RunMode::Full, start);
        report.add_table("SALES", "SALES");
        report.record_transfer(&transfer("SALES", 998, &[17, 500]));
        report.finish(start, false);

        assert_eq!(report.status, RunStatus::CompletedWithErrors);
        assert_eq!(report.table("SALES").unwrap().status, TableStatus::Completed);
        assert_eq!(report.rows_failed, 2);
        assert_eq!(report.failures[0].row, Some(17));
        assert_eq!(report.exit_code(), EXIT_TRANSFER_ERROR);
        assert!(report.summary().contains("SALES row 500: too long"));
    }

    #[test]
    fn test_skipped_tables_fail_the_run() {
        let start = Utc::now();
        let mut report = MigrationReport::new("r3".into(), RunMode::StructureOnly, start);
        report.add_table("DEPARTMENT", "DEPARTMENT");
        report.add_table("EMPLOYEE", "EMPLOYEE");
        report.mark_failed("DEPARTMENT", "DDL failed");
        report.mark_skipped("EMPLOYEE", "DEPARTMENT");
        report.finish(start, false);

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.tables_failed, 1);
        assert_eq!(report.tables_skipped, 1);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"skipped_due_to_dependency_failure\""));
        assert!(json.contains("\"mode\": \"structure_only\""));
    }

    #[test]
    fn test_pending_tables_cancelled() {
        let start = Utc::now();
        let mut report = MigrationReport::new("r4".into(), RunMode::Full, start);
        report.add_table("A", "A");
        report.finish(start, true);
        assert_eq!(report.table("A").unwrap().status, TableStatus::Cancelled);
        assert_eq!(report.exit_code(), EXIT_CANCELLED);
    }
}
