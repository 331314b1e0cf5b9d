//! Schema synthesis: table specs in, ordered MySQL DDL out.
//!
//! [`synthesize`] is a pure transform. It maps every column through the
//! type mapper, normalizes identifiers, orders tables by their foreign key
//! dependencies and emits statements in four phases:
//!
//! 1. `DROP TABLE IF EXISTS` (optional, reverse dependency order, with
//!    foreign key checks disabled)
//! 2. `CREATE TABLE` with the primary key inline
//! 3. `CREATE [UNIQUE] INDEX`
//! 4. `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY`
//!
//! Foreign keys always come last so cyclic references need no special case.

pub mod graph;

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{DefaultValuePolicy, MigrationConfig};
use crate::core::identifier;
use crate::core::schema::{ColumnSpec, ForeignKeySpec, IndexSpec, ReferentialAction, TableSpec};
use crate::core::traits::{InsertTarget, TargetKind, TypeMapper, TypeMapping};
use crate::error::{MigrateError, Result};
use crate::typemap::{translate_default, FirebirdToMysqlMapper};

pub use graph::DependencyGraph;

/// Key prefix length for TEXT/BLOB key parts.
const KEY_PREFIX_LENGTH: u32 = 255;

/// MySQL row size limit, counted over every inline column.
const MYSQL_MAX_ROW_BYTES: usize = 65535;

const TABLE_OPTIONS: &str = "ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci";

/// DDL phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DdlPhase {
    Drop,
    Create,
    Index,
    ForeignKey,
}

/// What a statement does, for executors that need more than the SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlKind {
    /// Session-level setting such as `SET FOREIGN_KEY_CHECKS`.
    SessionSetting,
    DropTable,
    /// Create a table with these folded column names.
    CreateTable { columns: Vec<String> },
    CreateIndex { name: String },
    /// Add a foreign key referencing the folded table `references`.
    AddForeignKey { name: String, references: String },
}

/// One generated statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStatement {
    pub phase: DdlPhase,
    pub kind: DdlKind,
    /// Folded target name of the table the statement belongs to.
    pub table: Option<String>,
    pub sql: String,
}

/// Options controlling synthesis.
#[derive(Debug, Clone)]
pub struct SynthesisPolicy {
    pub drop_existing: bool,
    pub lowercase: bool,
    pub create_indexes: bool,
    pub create_foreign_keys: bool,
    pub default_values: DefaultValuePolicy,
    pub detect_boolean_domains: bool,
}

impl Default for SynthesisPolicy {
    fn default() -> Self {
        Self {
            drop_existing: false,
            lowercase: false,
            create_indexes: true,
            create_foreign_keys: true,
            default_values: DefaultValuePolicy::default(),
            detect_boolean_domains: false,
        }
    }
}

impl SynthesisPolicy {
    pub fn from_config(migration: &MigrationConfig) -> Self {
        Self {
            drop_existing: migration.drop_tables,
            lowercase: migration.lowercase,
            create_indexes: migration.create_indexes,
            create_foreign_keys: migration.create_foreign_keys,
            default_values: migration.default_values,
            detect_boolean_domains: migration.detect_boolean_domains,
        }
    }

    fn mapper(&self) -> FirebirdToMysqlMapper {
        FirebirdToMysqlMapper::new().with_boolean_domains(self.detect_boolean_domains)
    }
}

/// A column with its resolved target name, type and default.
#[derive(Debug, Clone)]
pub struct MappedColumn {
    pub source_name: String,
    /// Folded, unquoted.
    pub target_name: String,
    /// Ready to splice into SQL.
    pub quoted_name: String,
    pub mapping: TypeMapping,
    /// Expression after `DEFAULT`, if any.
    pub default: Option<String>,
}

/// A table with every column mapped.
#[derive(Debug, Clone)]
pub struct MappedTable {
    pub source: TableSpec,
    pub target_name: String,
    pub quoted_name: String,
    pub columns: Vec<MappedColumn>,
}

impl MappedTable {
    /// Names for the INSERT statement, in source column order.
    pub fn insert_target(&self) -> InsertTarget {
        InsertTarget {
            table: self.target_name.clone(),
            quoted_table: self.quoted_name.clone(),
            quoted_columns: self.columns.iter().map(|c| c.quoted_name.clone()).collect(),
        }
    }

    /// Target kind per column, in source column order.
    pub fn kinds(&self) -> Vec<TargetKind> {
        self.columns.iter().map(|c| c.mapping.kind).collect()
    }

    fn column(&self, source_name: &str) -> Option<&MappedColumn> {
        self.columns.iter().find(|c| c.source_name == source_name)
    }
}

/// A table that could not be synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub reason: String,
}

/// A table left out because a table it depends on failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTable {
    pub table: String,
    pub blocked_by: String,
}

/// Output of [`synthesize`].
#[derive(Debug, Clone)]
pub struct SchemaScript {
    /// All statements, phase by phase.
    pub statements: Vec<DdlStatement>,
    /// Tables that will be created, in dependency order.
    pub tables: Vec<MappedTable>,
    pub failures: Vec<TableFailure>,
    pub skipped: Vec<SkippedTable>,
    /// Lossy mappings, dropped defaults, omitted indexes and constraints.
    pub warnings: Vec<String>,
    /// Graph over the tables given to [`synthesize`].
    pub graph: DependencyGraph,
}

impl SchemaScript {
    /// Statements of one phase.
    pub fn phase(&self, phase: DdlPhase) -> impl Iterator<Item = &DdlStatement> {
        self.statements.iter().filter(move |s| s.phase == phase)
    }

    /// Statements of one phase belonging to a table (folded name).
    pub fn for_table<'a>(
        &'a self,
        phase: DdlPhase,
        table: &'a str,
    ) -> impl Iterator<Item = &'a DdlStatement> {
        self.phase(phase)
            .filter(move |s| s.table.as_deref() == Some(table))
    }

    /// Look up a mapped table by source name.
    pub fn table(&self, source_name: &str) -> Option<&MappedTable> {
        self.tables.iter().find(|t| t.source.name == source_name)
    }
}

/// Generate the DDL for `tables`.
///
/// Tables whose columns cannot be mapped are reported in
/// [`SchemaScript::failures`]; every table depending on them is reported in
/// [`SchemaScript::skipped`]. Neither produces statements.
pub fn synthesize(tables: &[TableSpec], policy: &SynthesisPolicy) -> SchemaScript {
    let graph = DependencyGraph::build(tables);
    let by_name: HashMap<&str, &TableSpec> = tables.iter().map(|t| (t.name.as_str(), t)).collect();
    let mapper = policy.mapper();

    let mut warnings = Vec::new();
    let mut failures = Vec::new();
    let mut mapped: Vec<MappedTable> = Vec::new();

    for name in graph.order() {
        let Some(table) = by_name.get(name) else {
            continue;
        };
        match map_table(table, policy, &mapper, &mut warnings) {
            Ok(t) => mapped.push(t),
            Err(e) => {
                warn!("Cannot synthesize {}: {}", table.name, e);
                failures.push(TableFailure {
                    table: table.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut skipped = Vec::new();
    let failed: BTreeSet<&str> = failures.iter().map(|f| f.table.as_str()).collect();
    let mut blocked: HashMap<String, String> = HashMap::new();
    for f in &failed {
        for dependent in graph.dependents_of(f) {
            if !failed.contains(dependent.as_str()) {
                blocked.entry(dependent).or_insert_with(|| f.to_string());
            }
        }
    }
    mapped.retain(|t| match blocked.get(&t.source.name) {
        Some(by) => {
            warn!("Skipping {}: depends on failed table {}", t.source.name, by);
            skipped.push(SkippedTable {
                table: t.source.name.clone(),
                blocked_by: by.clone(),
            });
            false
        }
        None => true,
    });

    let statements = build_statements(&mapped, policy, &mut warnings);
    debug!(
        "Synthesized {} statements for {} tables",
        statements.len(),
        mapped.len()
    );

    SchemaScript {
        statements,
        tables: mapped,
        failures,
        skipped,
        warnings,
        graph,
    }
}

/// Map one table's name and columns.
pub fn map_table(
    table: &TableSpec,
    policy: &SynthesisPolicy,
    mapper: &dyn TypeMapper,
    warnings: &mut Vec<String>,
) -> Result<MappedTable> {
    if table.columns.is_empty() {
        return Err(MigrateError::SchemaInconsistency(format!(
            "table {} has no migratable columns",
            table.name
        )));
    }

    let target_name = identifier::fold(&table.name, policy.lowercase);
    let quoted_name = identifier::normalize(&table.name, policy.lowercase)?;

    let mut mappings = Vec::with_capacity(table.columns.len());
    for col in &table.columns {
        let mapping = mapper.map_column(&table.name, col)?;
        if let Some(w) = &mapping.warning {
            warn!("{}.{}: {}", table.name, col.name, w);
            warnings.push(format!("{}.{}: {}", table.name, col.name, w));
        }
        mappings.push(mapping);
    }
    fit_row_size(table, &mut mappings, warnings);

    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(table.columns.len());
    for (col, mapping) in table.columns.iter().zip(mappings) {
        let mapped = map_column(&table.name, col, mapping, policy, warnings)?;
        if !seen.insert(mapped.target_name.to_lowercase()) {
            return Err(MigrateError::SchemaInconsistency(format!(
                "column {}.{} collides with another column as {}",
                table.name, col.name, mapped.target_name
            )));
        }
        columns.push(mapped);
    }

    Ok(MappedTable {
        source: table.clone(),
        target_name,
        quoted_name,
        columns,
    })
}

/// Move the widest VARCHAR/VARBINARY columns off-row until the row fits
/// MySQL's 65535-byte limit.
fn fit_row_size(table: &TableSpec, mappings: &mut [TypeMapping], warnings: &mut Vec<String>) {
    let nullable = table
        .columns
        .iter()
        .filter(|c| c.is_nullable && !table.primary_key.contains(&c.name))
        .count();
    let null_bitmap = nullable.div_ceil(8);

    loop {
        let size: usize = null_bitmap + mappings.iter().map(|m| inline_bytes(m.kind)).sum::<usize>();
        if size <= MYSQL_MAX_ROW_BYTES {
            return;
        }

        let widest = mappings
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m.kind, TargetKind::Varchar { .. } | TargetKind::Varbinary { .. }))
            .max_by_key(|(i, m)| (inline_bytes(m.kind), std::cmp::Reverse(*i)))
            .map(|(i, _)| i);
        let Some(i) = widest else {
            // Only fixed-width columns left; let the server report it
            warn!("{}: row of {} bytes exceeds the MySQL row limit", table.name, size);
            return;
        };

        let demoted = off_row(mappings[i].kind);
        let note = format!(
            "{}.{}: {} stored as {} to fit the {}-byte MySQL row limit",
            table.name,
            table.columns[i].name,
            mappings[i].target_type,
            demoted.target_type,
            MYSQL_MAX_ROW_BYTES
        );
        warn!("{}", note);
        warnings.push(note);
        mappings[i] = demoted;
    }
}

/// Bytes a column takes against the row limit (utf8mb4, 4 bytes per character).
fn inline_bytes(kind: TargetKind) -> usize {
    let with_prefix = |bytes: usize| bytes + if bytes > 255 { 2 } else { 1 };
    match kind {
        TargetKind::Bool => 1,
        TargetKind::SmallInt => 2,
        TargetKind::Int | TargetKind::Float => 4,
        TargetKind::BigInt | TargetKind::Double => 8,
        TargetKind::Decimal { precision, scale } => {
            decimal_bytes(precision.saturating_sub(scale)) + decimal_bytes(scale)
        }
        TargetKind::Char { length } => length as usize * 4,
        TargetKind::Varchar { length } => with_prefix(length as usize * 4),
        TargetKind::Binary { length } => length as usize,
        TargetKind::Varbinary { length } => with_prefix(length as usize),
        // Pointer kept in the row
        TargetKind::Text | TargetKind::Blob => 12,
        TargetKind::Date => 3,
        // Fractional seconds (4 digits) take 2 extra bytes
        TargetKind::Time => 5,
        TargetKind::DateTime => 7,
    }
}

/// DECIMAL storage: 4 bytes per 9 digits plus the leftover digits.
fn decimal_bytes(digits: u32) -> usize {
    const LEFTOVER: [usize; 9] = [0, 1, 1, 2, 2, 3, 3, 4, 4];
    (digits / 9) as usize * 4 + LEFTOVER[(digits % 9) as usize]
}

fn off_row(kind: TargetKind) -> TypeMapping {
    match kind {
        TargetKind::Varchar { length } if (length as usize) * 4 <= 65535 => {
            TypeMapping::lossless("TEXT", TargetKind::Text)
        }
        TargetKind::Varchar { .. } => TypeMapping::lossless("MEDIUMTEXT", TargetKind::Text),
        _ => TypeMapping::lossless("BLOB", TargetKind::Blob),
    }
}

fn map_column(
    table: &str,
    col: &ColumnSpec,
    mapping: TypeMapping,
    policy: &SynthesisPolicy,
    warnings: &mut Vec<String>,
) -> Result<MappedColumn> {
    let default = match &col.default {
        None => None,
        Some(source) => {
            let translated = translate_default(source, mapping.kind, policy.default_values)
                .map_err(|reason| MigrateError::ddl(table, format!("column {}: {}", col.name, reason)))?;
            if let Some(w) = translated.warning {
                warn!("{}.{}: {}", table, col.name, w);
                warnings.push(format!("{}.{}: {}", table, col.name, w));
            }
            translated.clause
        }
    };

    Ok(MappedColumn {
        source_name: col.name.clone(),
        target_name: identifier::fold(&col.name, policy.lowercase),
        quoted_name: identifier::normalize(&col.name, policy.lowercase)?,
        mapping,
        default,
    })
}

fn build_statements(
    tables: &[MappedTable],
    policy: &SynthesisPolicy,
    warnings: &mut Vec<String>,
) -> Vec<DdlStatement> {
    let mut out = Vec::new();

    if policy.drop_existing && !tables.is_empty() {
        out.push(session(DdlPhase::Drop, "SET FOREIGN_KEY_CHECKS = 0"));
        for t in tables.iter().rev() {
            out.push(DdlStatement {
                phase: DdlPhase::Drop,
                kind: DdlKind::DropTable,
                table: Some(t.target_name.clone()),
                sql: format!("DROP TABLE IF EXISTS {}", t.quoted_name),
            });
        }
        out.push(session(DdlPhase::Drop, "SET FOREIGN_KEY_CHECKS = 1"));
    }

    for t in tables {
        out.push(DdlStatement {
            phase: DdlPhase::Create,
            kind: DdlKind::CreateTable {
                columns: t.columns.iter().map(|c| c.target_name.clone()).collect(),
            },
            table: Some(t.target_name.clone()),
            sql: create_table_sql(t, warnings),
        });
    }

    if policy.create_indexes {
        for t in tables {
            for idx in &t.source.indexes {
                match create_index_sql(t, idx, policy.lowercase) {
                    Ok((name, sql)) => out.push(DdlStatement {
                        phase: DdlPhase::Index,
                        kind: DdlKind::CreateIndex { name },
                        table: Some(t.target_name.clone()),
                        sql,
                    }),
                    Err(reason) => {
                        let note = format!("{}: index {} omitted: {}", t.source.name, idx.name, reason);
                        warn!("{}", note);
                        warnings.push(note);
                    }
                }
            }
        }
    }

    if policy.create_foreign_keys {
        let present: HashMap<&str, &MappedTable> =
            tables.iter().map(|t| (t.source.name.as_str(), t)).collect();
        for t in tables {
            for fk in &t.source.foreign_keys {
                let Some(parent) = present.get(fk.ref_table.as_str()) else {
                    let note = format!(
                        "{}: foreign key {} omitted: referenced table {} is not migrated",
                        t.source.name, fk.name, fk.ref_table
                    );
                    warn!("{}", note);
                    warnings.push(note);
                    continue;
                };
                match add_foreign_key_sql(t, parent, fk, policy.lowercase, warnings) {
                    Ok((name, sql)) => out.push(DdlStatement {
                        phase: DdlPhase::ForeignKey,
                        kind: DdlKind::AddForeignKey {
                            name,
                            references: parent.target_name.clone(),
                        },
                        table: Some(t.target_name.clone()),
                        sql,
                    }),
                    Err(reason) => {
                        let note = format!("{}: foreign key {} omitted: {}", t.source.name, fk.name, reason);
                        warn!("{}", note);
                        warnings.push(note);
                    }
                }
            }
        }
    }

    out
}

fn session(phase: DdlPhase, sql: &str) -> DdlStatement {
    DdlStatement {
        phase,
        kind: DdlKind::SessionSetting,
        table: None,
        sql: sql.to_string(),
    }
}

fn create_table_sql(t: &MappedTable, warnings: &mut Vec<String>) -> String {
    let mut defs: Vec<String> = t
        .columns
        .iter()
        .zip(&t.source.columns)
        .map(|(c, src)| {
            let mut def = format!("{} {}", c.quoted_name, c.mapping.target_type);
            if !src.is_nullable || t.source.primary_key.contains(&src.name) {
                def.push_str(" NOT NULL");
            }
            if let Some(d) = &c.default {
                def.push_str(" DEFAULT ");
                def.push_str(d);
            }
            def
        })
        .collect();

    if t.source.has_pk() {
        match key_parts(t, &t.source.primary_key) {
            Ok(parts) => defs.push(format!("PRIMARY KEY ({})", parts.join(", "))),
            Err(reason) => {
                let note = format!("{}: primary key omitted: {}", t.source.name, reason);
                warn!("{}", note);
                warnings.push(note);
            }
        }
    }

    format!(
        "CREATE TABLE {} (\n    {}\n) {}",
        t.quoted_name,
        defs.join(",\n    "),
        TABLE_OPTIONS
    )
}

/// Quoted key parts, with prefix lengths where MySQL requires them.
fn key_parts(t: &MappedTable, columns: &[String]) -> std::result::Result<Vec<String>, String> {
    columns
        .iter()
        .map(|name| -> std::result::Result<String, String> {
            let c = t
                .column(name)
                .ok_or_else(|| format!("column {} is not migrated", name))?;
            Ok(if c.mapping.kind.needs_key_prefix() {
                format!("{}({})", c.quoted_name, KEY_PREFIX_LENGTH)
            } else {
                c.quoted_name.clone()
            })
        })
        .collect()
}

fn create_index_sql(
    t: &MappedTable,
    idx: &IndexSpec,
    lowercase: bool,
) -> std::result::Result<(String, String), String> {
    let name = identifier::fold(&idx.name, lowercase);
    let quoted = identifier::normalize(&idx.name, lowercase).map_err(|e| e.to_string())?;

    let mut parts = key_parts(t, &idx.columns)?;
    if idx.is_descending {
        for p in &mut parts {
            p.push_str(" DESC");
        }
    }

    let unique = if idx.is_unique { "UNIQUE " } else { "" };
    let sql = format!(
        "CREATE {}INDEX {} ON {} ({})",
        unique,
        quoted,
        t.quoted_name,
        parts.join(", ")
    );
    Ok((name, sql))
}

fn add_foreign_key_sql(
    t: &MappedTable,
    parent: &MappedTable,
    fk: &ForeignKeySpec,
    lowercase: bool,
    warnings: &mut Vec<String>,
) -> std::result::Result<(String, String), String> {
    if fk.columns.len() != fk.ref_columns.len() || fk.columns.is_empty() {
        return Err("column lists do not match".to_string());
    }

    let name = identifier::fold(&fk.name, lowercase);
    let quoted = identifier::normalize(&fk.name, lowercase).map_err(|e| e.to_string())?;

    let quote_cols = |table: &MappedTable, cols: &[String]| -> std::result::Result<Vec<String>, String> {
        cols.iter()
            .map(|c| {
                table
                    .column(c)
                    .map(|m| m.quoted_name.clone())
                    .ok_or_else(|| format!("column {}.{} is not migrated", table.source.name, c))
            })
            .collect()
    };
    let cols = quote_cols(t, &fk.columns)?;
    let ref_cols = quote_cols(parent, &fk.ref_columns)?;

    let mut rule = |action: ReferentialAction, event: &str| -> &'static str {
        if action == ReferentialAction::SetDefault {
            // InnoDB rejects SET DEFAULT
            let note = format!(
                "{}: foreign key {} ON {} SET DEFAULT replaced by NO ACTION",
                t.source.name, fk.name, event
            );
            warn!("{}", note);
            warnings.push(note);
            ReferentialAction::NoAction.as_sql()
        } else {
            action.as_sql()
        }
    };
    let on_delete = rule(fk.on_delete, "DELETE");
    let on_update = rule(fk.on_update, "UPDATE");

    let sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
        t.quoted_name,
        quoted,
        cols.join(", "),
        parent.quoted_name,
        ref_cols.join(", "),
        on_delete,
        on_update
    );
    Ok((name, sql))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk(name: &str, cols: &[&str], ref_table: &str, ref_cols: &[&str]) -> ForeignKeySpec {
        ForeignKeySpec {
            name: name.into(),
            columns: cols.iter().map(|s| s.to_string()).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_cols.iter().map(|s| s.to_string()).collect(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    fn customer() -> TableSpec {
        let mut t = TableSpec::new(
            "CUSTOMER",
            vec![
                ColumnSpec::new("CUST_NO", "INTEGER").not_null(),
                ColumnSpec::new("NAME", "VARCHAR").with_length(25).not_null(),
                ColumnSpec::new("ON_HOLD", "CHAR").with_length(1).with_default("'N'"),
            ],
        );
        t.primary_key = vec!["CUST_NO".into()];
        t.indexes = vec![IndexSpec {
            name: "CUSTNAMEX".into(),
            columns: vec!["NAME".into()],
            is_unique: false,
            is_descending: false,
        }];
        t
    }

    fn sales() -> TableSpec {
        let mut t = TableSpec::new(
            "SALES",
            vec![
                ColumnSpec::new("PO_NUMBER", "CHAR").with_length(8).not_null(),
                ColumnSpec::new("CUST_NO", "INTEGER").not_null(),
                ColumnSpec::new("ORDER_DATE", "TIMESTAMP").with_default("'NOW'"),
                ColumnSpec::new("TOTAL", "NUMERIC").with_precision(9, 2),
            ],
        );
        t.primary_key = vec!["PO_NUMBER".into()];
        t.foreign_keys = vec![fk("FK_SALES_CUST", &["CUST_NO"], "CUSTOMER", &["CUST_NO"])];
        t
    }

    fn sql_of(script: &SchemaScript, phase: DdlPhase) -> Vec<String> {
        script.phase(phase).map(|s| s.sql.clone()).collect()
    }

    #[test]
    fn test_create_table_sql() {
        let script = synthesize(&[customer()], &SynthesisPolicy::default());
        let creates = sql_of(&script, DdlPhase::Create);
        assert_eq!(
            creates[0],
            "CREATE TABLE CUSTOMER (\n    CUST_NO INT NOT NULL,\n    NAME VARCHAR(25) NOT NULL,\n    ON_HOLD CHAR(1) DEFAULT 'N',\n    PRIMARY KEY (CUST_NO)\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
        );
    }

    #[test]
    fn test_phases_are_ordered_and_tables_follow_references() {
        let policy = SynthesisPolicy {
            drop_existing: true,
            ..SynthesisPolicy::default()
        };
        // Child listed first on purpose
        let script = synthesize(&[sales(), customer()], &policy);

        let phases: Vec<DdlPhase> = script.statements.iter().map(|s| s.phase).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);

        let drops = sql_of(&script, DdlPhase::Drop);
        assert_eq!(
            drops,
            vec![
                "SET FOREIGN_KEY_CHECKS = 0",
                "DROP TABLE IF EXISTS SALES",
                "DROP TABLE IF EXISTS CUSTOMER",
                "SET FOREIGN_KEY_CHECKS = 1",
            ]
        );

        let created: Vec<&str> = script.tables.iter().map(|t| t.target_name.as_str()).collect();
        assert_eq!(created, vec!["CUSTOMER", "SALES"]);

        let fks = sql_of(&script, DdlPhase::ForeignKey);
        assert_eq!(
            fks,
            vec!["ALTER TABLE SALES ADD CONSTRAINT FK_SALES_CUST FOREIGN KEY (CUST_NO) REFERENCES CUSTOMER (CUST_NO) ON DELETE NO ACTION ON UPDATE NO ACTION"]
        );
        assert_eq!(
            sql_of(&script, DdlPhase::Index),
            vec!["CREATE INDEX CUSTNAMEX ON CUSTOMER (NAME)"]
        );
    }

    #[test]
    fn test_lowercase_policy() {
        let policy = SynthesisPolicy {
            lowercase: true,
            ..SynthesisPolicy::default()
        };
        let script = synthesize(&[customer(), sales()], &policy);
        let sales = script.table("SALES").unwrap();
        assert_eq!(sales.target_name, "sales");
        assert_eq!(sales.insert_target().quoted_columns, vec!["po_number", "cust_no", "order_date", "total"]);
        assert!(script
            .phase(DdlPhase::Create)
            .any(|s| s.sql.contains("order_date DATETIME(4) DEFAULT CURRENT_TIMESTAMP(4)")));
    }

    #[test]
    fn test_foreign_key_to_absent_table_is_omitted() {
        let script = synthesize(&[sales()], &SynthesisPolicy::default());
        assert_eq!(script.phase(DdlPhase::ForeignKey).count(), 0);
        assert!(script.warnings.iter().any(|w| w.contains("FK_SALES_CUST")));
    }

    #[test]
    fn test_cyclic_references_use_second_pass() {
        let mut dept = TableSpec::new(
            "DEPARTMENT",
            vec![
                ColumnSpec::new("DEPT_NO", "CHAR").with_length(3).not_null(),
                ColumnSpec::new("MNGR_NO", "SMALLINT"),
            ],
        );
        dept.primary_key = vec!["DEPT_NO".into()];
        dept.foreign_keys = vec![fk("FK_DEPT_MNGR", &["MNGR_NO"], "EMPLOYEE", &["EMP_NO"])];

        let mut emp = TableSpec::new(
            "EMPLOYEE",
            vec![
                ColumnSpec::new("EMP_NO", "SMALLINT").not_null(),
                ColumnSpec::new("DEPT_NO", "CHAR").with_length(3),
            ],
        );
        emp.primary_key = vec!["EMP_NO".into()];
        emp.foreign_keys = vec![fk("FK_EMP_DEPT", &["DEPT_NO"], "DEPARTMENT", &["DEPT_NO"])];

        let script = synthesize(&[emp, dept], &SynthesisPolicy::default());
        assert!(script.failures.is_empty());
        assert_eq!(script.phase(DdlPhase::Create).count(), 2);
        assert_eq!(script.phase(DdlPhase::ForeignKey).count(), 2);
        assert_eq!(script.graph.cyclic_tables(), vec!["DEPARTMENT", "EMPLOYEE"]);
    }

    #[test]
    fn test_unsupported_type_fails_table_and_skips_dependents() {
        let mut bad = customer();
        bad.columns.push(ColumnSpec::new("GRID", "ARRAY OF INTEGER"));

        let other = TableSpec::new("AUDIT", vec![ColumnSpec::new("ID", "BIGINT")]);
        let script = synthesize(&[bad, sales(), other], &SynthesisPolicy::default());

        assert_eq!(script.failures.len(), 1);
        assert_eq!(script.failures[0].table, "CUSTOMER");
        assert!(script.failures[0].reason.contains("ARRAY OF INTEGER"));
        assert_eq!(
            script.skipped,
            vec![SkippedTable {
                table: "SALES".into(),
                blocked_by: "CUSTOMER".into()
            }]
        );
        let created: Vec<&str> = script.tables.iter().map(|t| t.target_name.as_str()).collect();
        assert_eq!(created, vec!["AUDIT"]);
    }

    #[test]
    fn test_text_key_parts_get_prefix() {
        let mut t = TableSpec::new(
            "NOTE",
            vec![
                ColumnSpec::new("TITLE", "VARCHAR").with_length(20000).not_null(),
                ColumnSpec::new("BODY", "BLOB SUB_TYPE TEXT"),
            ],
        );
        t.primary_key = vec!["TITLE".into()];
        t.indexes = vec![IndexSpec {
            name: "IDX_BODY".into(),
            columns: vec!["BODY".into()],
            is_unique: false,
            is_descending: true,
        }];

        let script = synthesize(&[t], &SynthesisPolicy::default());
        let create = &sql_of(&script, DdlPhase::Create)[0];
        assert!(create.contains("PRIMARY KEY (TITLE(255))"));
        assert_eq!(
            sql_of(&script, DdlPhase::Index),
            vec!["CREATE INDEX IDX_BODY ON NOTE (BODY(255) DESC)"]
        );
    }

    #[test]
    fn test_set_default_rule_downgraded() {
        let mut s = sales();
        s.foreign_keys[0].on_delete = ReferentialAction::SetDefault;
        s.foreign_keys[0].on_update = ReferentialAction::Cascade;
        let script = synthesize(&[customer(), s], &SynthesisPolicy::default());
        let fks = sql_of(&script, DdlPhase::ForeignKey);
        assert!(fks[0].ends_with("ON DELETE NO ACTION ON UPDATE CASCADE"));
        assert!(script.warnings.iter().any(|w| w.contains("SET DEFAULT")));
    }

    #[test]
    fn test_default_fail_policy_fails_table() {
        let mut t = customer();
        t.columns[1] = ColumnSpec::new("NAME", "VARCHAR").with_length(31).with_default("CURRENT_USER");
        let policy = SynthesisPolicy {
            default_values: DefaultValuePolicy::Fail,
            ..SynthesisPolicy::default()
        };
        let script = synthesize(&[t.clone()], &policy);
        assert_eq!(script.failures.len(), 1);
        assert!(script.failures[0].reason.contains("CURRENT_USER"));

        // Approximate drops it with a warning instead
        let script = synthesize(&[t], &SynthesisPolicy::default());
        assert!(script.failures.is_empty());
        assert!(script.warnings.iter().any(|w| w.contains("CURRENT_USER")));
        assert!(!sql_of(&script, DdlPhase::Create)[0].contains("CURRENT_USER"));
    }

    #[test]
    fn test_lowercase_collision_is_reported() {
        let t = TableSpec::new(
            "T",
            vec![ColumnSpec::new("Name", "INTEGER"), ColumnSpec::new("NAME", "INTEGER")],
        );
        let policy = SynthesisPolicy {
            lowercase: true,
            ..SynthesisPolicy::default()
        };
        let script = synthesize(&[t], &policy);
        assert_eq!(script.failures.len(), 1);
        assert!(script.failures[0].reason.contains("collides"));
    }

    #[test]
    fn test_indexes_and_foreign_keys_can_be_disabled() {
        let policy = SynthesisPolicy {
            create_indexes: false,
            create_foreign_keys: false,
            ..SynthesisPolicy::default()
        };
        let script = synthesize(&[customer(), sales()], &policy);
        assert_eq!(script.phase(DdlPhase::Index).count(), 0);
        assert_eq!(script.phase(DdlPhase::ForeignKey).count(), 0);
    }

    fn varchar(name: &str, length: i32) -> ColumnSpec {
        ColumnSpec::new(name, "VARCHAR").with_length(length)
    }

    #[test]
    fn test_wide_varchar_next_to_int_moves_off_row() {
        let docs = TableSpec::new(
            "DOCS",
            vec![ColumnSpec::new("ID", "INTEGER"), varchar("BODY", 16383)],
        );
        let script = synthesize(&[docs], &SynthesisPolicy::default());

        let create = &sql_of(&script, DdlPhase::Create)[0];
        assert!(create.contains("BODY TEXT"), "{}", create);
        assert_eq!(script.tables[0].columns[1].mapping.kind, TargetKind::Text);
        assert!(script
            .warnings
            .iter()
            .any(|w| w.starts_with("DOCS.BODY: VARCHAR(16383) stored as TEXT")));
    }

    #[test]
    fn test_varchars_summing_past_row_limit_move_off_row() {
        let notes = TableSpec::new("NOTES", vec![varchar("A", 10000), varchar("B", 10000)]);
        let script = synthesize(&[notes], &SynthesisPolicy::default());

        assert!(script.failures.is_empty());
        let create = &sql_of(&script, DdlPhase::Create)[0];
        assert!(create.contains("A TEXT"), "{}", create);
        assert!(create.contains("B VARCHAR(10000)"), "{}", create);
        assert_eq!(script.warnings.len(), 1);
    }

    #[test]
    fn test_row_within_limit_stays_inline() {
        // 4 + 16000 * 4 + 2 + 1 null byte
        let docs = TableSpec::new(
            "DOCS",
            vec![ColumnSpec::new("ID", "INTEGER"), varchar("BODY", 16000)],
        );
        let script = synthesize(&[docs], &SynthesisPolicy::default());
        assert!(sql_of(&script, DdlPhase::Create)[0].contains("BODY VARCHAR(16000)"));
        assert!(script.warnings.is_empty());
    }

    #[test]
    fn test_inline_bytes_of_fixed_types() {
        assert_eq!(inline_bytes(TargetKind::Decimal { precision: 18, scale: 4 }), 9);
        assert_eq!(inline_bytes(TargetKind::Varchar { length: 63 }), 253);
        assert_eq!(inline_bytes(TargetKind::Varchar { length: 64 }), 258);
        assert_eq!(inline_bytes(TargetKind::DateTime), 7);
    }
}
