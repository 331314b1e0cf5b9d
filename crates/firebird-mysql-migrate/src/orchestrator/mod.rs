//! Migration orchestrator - main workflow coordinator.
//!
//! [`Orchestrator::prepare`] reads the source catalog and synthesizes the
//! target schema into an immutable [`MigrationPlan`]; [`Orchestrator::run`]
//! executes it:
//!
//! 1. drop, create and index phases (skipped in data-only mode)
//! 2. data transfer on a bounded worker pool, a table starting only once the
//!    tables it references have finished (skipped in structure-only mode)
//! 3. foreign keys, after all data so cyclic references load cleanly
//!
//! Table-level failures are recorded and the run moves on; tables depending
//! on a failed table are skipped. Connectivity errors end the run.

mod plan;
mod report;

pub use plan::MigrationPlan;
pub use report::{FailureEntry, MigrationReport, RunStatus, TableReport, TableStatus};

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RunMode};
use crate::core::traits::{SourceReader, TargetWriter};
use crate::ddl::{synthesize, DdlKind, DdlPhase, MappedTable, SchemaScript, SynthesisPolicy};
use crate::error::{MigrateError, Result};
use crate::source::introspect;
use crate::transfer::{TableTransfer, TransferConfig, TransferEngine};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
}

impl Orchestrator {
    /// Validate the configuration and connect to both databases.
    #[cfg(feature = "odbc")]
    pub async fn new(config: Config) -> Result<Self> {
        use crate::source::FirebirdReader;
        use crate::target::MysqlWriter;

        config.validate()?;
        let source = FirebirdReader::new(&config.source).await?;
        // One session per worker plus one for DDL
        let target = MysqlWriter::new(&config.target, config.migration.get_workers() + 1).await?;
        Ok(Self::with_endpoints(config, Arc::new(source), Arc::new(target)))
    }

    /// Without ODBC support there is no way to reach Firebird.
    #[cfg(not(feature = "odbc"))]
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Err(MigrateError::Config(
            "Firebird source unavailable: built without the 'odbc' feature".to_string(),
        ))
    }

    /// Build an orchestrator over already connected endpoints.
    pub fn with_endpoints(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
    ) -> Self {
        Self {
            config,
            source,
            target,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read the source schema and build the plan.
    pub async fn prepare(&self) -> Result<MigrationPlan> {
        let migration = &self.config.migration;
        let mode = self.config.run_mode();

        info!("Phase 1: Reading schema from {} source", self.source.db_type());
        let introspection =
            introspect(self.source.as_ref(), &migration.tables, migration.referenced_tables)
                .await?;

        let (tables, blocked) =
            plan::split_blocked(introspection.tables, &introspection.failures);
        for b in &blocked {
            warn!("Skipping {}: depends on unreadable table {}", b.table, b.blocked_by);
        }

        info!("Phase 2: Mapping {} tables to {}", tables.len(), self.target.db_type());
        let policy = SynthesisPolicy::from_config(migration);
        let script = synthesize(&tables, &policy);

        let cyclic = script.graph.cyclic_tables();
        if !cyclic.is_empty() {
            info!(
                "Foreign key cycle among {}; constraints are added after all tables exist",
                cyclic.join(", ")
            );
        }

        Ok(MigrationPlan {
            mode,
            tables,
            policy,
            script,
            workers: migration.get_workers().max(1),
            batch_size: migration.batch_size.max(1),
            trim_char_padding: migration.trim_char_padding,
            introspection_failures: introspection.failures,
            blocked,
            warnings: introspection.warnings,
        })
    }

    /// Prepare and run in one call.
    pub async fn migrate(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let plan = self.prepare().await?;
        self.run(&plan, cancel).await
    }

    /// Execute a plan.
    ///
    /// # Errors
    ///
    /// Only run-level failures: lost connectivity, a missing target schema
    /// in data-only mode, or a failing session setting. Everything else is
    /// in the returned report.
    pub async fn run(&self, plan: &MigrationPlan, cancel: CancellationToken) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {} (mode: {})", run_id, plan.mode);

        let mut report = MigrationReport::new(run_id, plan.mode, started_at);
        seed_report(&mut report, plan);
        let report = Mutex::new(report);

        let mut failed: BTreeSet<String> = plan
            .introspection_failures
            .iter()
            .map(|f| f.table.clone())
            .chain(plan.blocked.iter().map(|b| b.table.clone()))
            .chain(plan.script.failures.iter().map(|f| f.table.clone()))
            .chain(plan.script.skipped.iter().map(|s| s.table.clone()))
            .collect();

        if plan.mode == RunMode::DataOnly {
            self.check_target_schema(&plan.script).await?;
        } else {
            info!("Phase 3: Creating target schema");
            self.execute_schema(plan, &report, &mut failed).await?;
        }

        if plan.mode != RunMode::StructureOnly {
            info!("Phase 4: Transferring data");
            self.transfer_data(plan, &report, &mut failed, &cancel).await?;
        }

        if plan.mode != RunMode::DataOnly && plan.policy.create_foreign_keys {
            if cancel.is_cancelled() {
                warn!("Cancelled: foreign keys not created");
            } else {
                info!("Phase 5: Creating foreign keys");
                self.execute_foreign_keys(&plan.script, &report, &failed).await?;
            }
        }

        let mut report = report
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        report.finish(Utc::now(), cancel.is_cancelled());

        info!(
            "Migration {:?}: {} tables, {} rows in {:.1}s ({} rows/s)",
            report.status,
            report.tables_total,
            report.rows_transferred,
            report.duration_seconds,
            report.rows_per_second
        );
        Ok(report)
    }

    /// Close both endpoints.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }

    /// Data-only runs need every planned table on the target already.
    async fn check_target_schema(&self, script: &SchemaScript) -> Result<()> {
        let mut missing = Vec::new();
        for table in &script.tables {
            if !self.target.table_exists(&table.target_name).await? {
                missing.push(table.target_name.clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            error!("Target is missing {} tables: {}", missing.len(), missing.join(", "));
            Err(MigrateError::SchemaMissing { tables: missing })
        }
    }

    /// Drop, create and index phases on one session, in dependency order.
    async fn execute_schema(
        &self,
        plan: &MigrationPlan,
        report: &Mutex<MigrationReport>,
        failed: &mut BTreeSet<String>,
    ) -> Result<()> {
        let script = &plan.script;
        let mut session = self.target.open_session().await?;
        let by_target: HashMap<&str, &MappedTable> = script
            .tables
            .iter()
            .map(|t| (t.target_name.as_str(), t))
            .collect();

        for stmt in script.phase(DdlPhase::Drop) {
            let source_name = stmt
                .table
                .as_deref()
                .and_then(|t| by_target.get(t))
                .map(|t| t.source.name.clone());
            match (session.execute(stmt).await, source_name) {
                (Ok(()), _) => {}
                (Err(e), _) if e.is_fatal() => return Err(e),
                (Err(e), Some(table)) => {
                    warn!("{}: drop failed: {}", table, e);
                    self.fail_with_dependents(script, report, failed, &table, e.to_string());
                }
                (Err(e), None) => return Err(e),
            }
        }

        for table in &script.tables {
            let name = table.source.name.as_str();
            if failed.contains(name) {
                continue;
            }

            let statements = script
                .for_table(DdlPhase::Create, &table.target_name)
                .chain(script.for_table(DdlPhase::Index, &table.target_name));
            for stmt in statements {
                if let Err(e) = session.execute(stmt).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!("{}: {}", name, e);
                    self.fail_with_dependents(script, report, failed, name, e.to_string());
                    break;
                }
            }

            if !failed.contains(name) {
                debug!("Created {} as {}", name, table.quoted_name);
            }
        }
        Ok(())
    }

    /// Foreign key phase. Constraints touching a failed table are left out.
    async fn execute_foreign_keys(
        &self,
        script: &SchemaScript,
        report: &Mutex<MigrationReport>,
        failed: &BTreeSet<String>,
    ) -> Result<()> {
        let source_of: HashMap<&str, &str> = script
            .tables
            .iter()
            .map(|t| (t.target_name.as_str(), t.source.name.as_str()))
            .collect();
        let is_failed = |target: &str| {
            source_of
                .get(target)
                .map_or(true, |source| failed.contains(*source))
        };

        let mut session = self.target.open_session().await?;
        for stmt in script.phase(DdlPhase::ForeignKey) {
            let (Some(table), DdlKind::AddForeignKey { name, references }) = (&stmt.table, &stmt.kind)
            else {
                continue;
            };
            if is_failed(table.as_str()) || is_failed(references.as_str()) {
                debug!("Not adding {} on {}: table failed", name, table);
                continue;
            }

            if let Err(e) = session.execute(stmt).await {
                if e.is_fatal() {
                    return Err(e);
                }
                let source = source_of
                    .get(table.as_str())
                    .copied()
                    .unwrap_or(table.as_str());
                warn!("{}: foreign key {} failed: {}", source, name, e);
                lock(report).mark_failed(source, e.to_string());
            }
        }
        Ok(())
    }

    /// Transfer every table on a bounded pool, respecting FK order.
    async fn transfer_data(
        &self,
        plan: &MigrationPlan,
        report: &Mutex<MigrationReport>,
        failed: &mut BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let script = &plan.script;
        let engine = Arc::new(TransferEngine::new(
            self.source.clone(),
            self.target.clone(),
            TransferConfig {
                batch_size: plan.batch_size,
                trim_char_padding: plan.trim_char_padding,
            },
        ));

        let mut pending: Vec<&MappedTable> = script
            .tables
            .iter()
            .filter(|t| !failed.contains(&t.source.name))
            .collect();
        let mut done: BTreeSet<String> = BTreeSet::new();
        let workers = plan.workers;
        let run_cancel = cancel.child_token();

        info!(
            "Transferring {} tables with {} workers",
            pending.len(),
            workers
        );

        let mut running: JoinSet<(String, Result<TableTransfer>)> = JoinSet::new();

        loop {
            if !run_cancel.is_cancelled() {
                let mut i = 0;
                while i < pending.len() && running.len() < workers {
                    let table = pending[i];
                    let name = table.source.name.as_str();
                    let prerequisites = script.graph.prerequisites(name);

                    if let Some(blocker) = prerequisites.iter().find(|p| failed.contains(**p)) {
                        warn!("Skipping {}: depends on failed table {}", name, blocker);
                        lock(report).mark_skipped(name, blocker);
                        failed.insert(name.to_string());
                        pending.remove(i);
                        continue;
                    }
                    if !prerequisites.iter().all(|p| done.contains(*p)) {
                        i += 1;
                        continue;
                    }

                    let table = pending.remove(i).clone();
                    let engine = engine.clone();
                    let source = self.source.clone();
                    let token = run_cancel.clone();
                    running.spawn(async move {
                        let name = table.source.name.clone();
                        if let Ok(rows) = source.row_count(&name).await {
                            info!("{}: {} rows to transfer", name, rows);
                        }
                        let result = engine.transfer(&table, &token).await;
                        (name, result)
                    });
                }
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (name, result) = joined.map_err(|e| {
                MigrateError::transfer("worker", format!("transfer task failed: {}", e))
            })?;

            match result {
                Ok(transfer) => {
                    lock(report).record_transfer(&transfer);
                    if let Some(err) = &transfer.error {
                        error!("{}: transfer failed: {}", name, err);
                        failed.insert(name);
                    } else if transfer.cancelled {
                        failed.insert(name);
                    } else {
                        done.insert(name);
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!("{}: {}", name, e);
                    run_cancel.cancel();
                    // Workers finish their in-flight batch before stopping
                    while running.join_next().await.is_some() {}
                    return Err(e);
                }
                Err(e) => {
                    error!("{}: {}", name, e);
                    lock(report).mark_failed(&name, e.to_string());
                    failed.insert(name);
                }
            }
        }

        for table in pending {
            let name = table.source.name.as_str();
            if cancel.is_cancelled() {
                lock(report).mark_cancelled(name);
                continue;
            }
            let blocker = script
                .graph
                .prerequisites(name)
                .into_iter()
                .find(|p| !done.contains(*p))
                .unwrap_or(name)
                .to_string();
            lock(report).mark_skipped(name, &blocker);
        }

        Ok(())
    }

    fn fail_with_dependents(
        &self,
        script: &SchemaScript,
        report: &Mutex<MigrationReport>,
        failed: &mut BTreeSet<String>,
        table: &str,
        reason: String,
    ) {
        let mut report = lock(report);
        report.mark_failed(table, reason);
        failed.insert(table.to_string());

        for dependent in script.graph.dependents_of(table) {
            if failed.insert(dependent.clone()) {
                warn!("Skipping {}: depends on failed table {}", dependent, table);
                report.mark_skipped(&dependent, table);
            }
        }
    }
}

/// Register every table and the failures decided at planning time.
fn seed_report(report: &mut MigrationReport, plan: &MigrationPlan) {
    for f in &plan.introspection_failures {
        report.add_table(&f.table, &f.table);
        report.mark_failed(&f.table, f.reason.clone());
    }
    for b in &plan.blocked {
        report.add_table(&b.table, &b.table);
        report.mark_skipped(&b.table, &b.blocked_by);
    }
    for f in &plan.script.failures {
        report.add_table(&f.table, &f.table);
        report.mark_failed(&f.table, f.reason.clone());
    }
    for s in &plan.script.skipped {
        report.add_table(&s.table, &s.table);
        report.mark_skipped(&s.table, &s.blocked_by);
    }
    for t in &plan.script.tables {
        report.add_table(&t.source.name, &t.target_name);
    }
    report.add_warnings(plan.warnings.iter().cloned());
    report.add_warnings(plan.script.warnings.iter().cloned());
}

fn lock(report: &Mutex<MigrationReport>) -> MutexGuard<'_, MigrationReport> {
    report.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
