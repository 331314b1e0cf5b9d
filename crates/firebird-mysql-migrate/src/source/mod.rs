//! Schema introspection over a [`SourceReader`].
//!
//! [`introspect`] resolves the table filter against the source catalog and
//! loads each selected table. Tables referenced through foreign keys are
//! pulled in according to [`ReferencedTablePolicy`].

pub mod catalog;

#[cfg(feature = "odbc")]
mod firebird;

#[cfg(feature = "odbc")]
pub use firebird::FirebirdReader;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, info, warn};

use crate::config::ReferencedTablePolicy;
use crate::core::schema::TableSpec;
use crate::core::traits::SourceReader;
use crate::error::{MigrateError, Result};

/// A table that could not be introspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectionFailure {
    pub table: String,
    pub reason: String,
}

/// Output of [`introspect`].
#[derive(Debug, Clone, Default)]
pub struct Introspection {
    /// Loaded tables, sorted by name.
    pub tables: Vec<TableSpec>,
    /// Tables that were requested (or referenced) but could not be loaded.
    pub failures: Vec<IntrospectionFailure>,
    /// Foreign keys dropped under [`ReferencedTablePolicy::Ignore`] and similar notes.
    pub warnings: Vec<String>,
}

/// Read the source catalog for the tables matching `filter` (empty = all).
///
/// # Errors
///
/// - `CatalogRead` (or `Connectivity`) when the table list cannot be read
/// - `SchemaInconsistency` when a foreign key leaves the filtered set and the
///   policy is [`ReferencedTablePolicy::Fail`], or references a table the
///   catalog does not have
///
/// A table whose own metadata fails to load is recorded in
/// [`Introspection::failures`] and the others are still returned.
pub async fn introspect(
    source: &dyn SourceReader,
    filter: &[String],
    policy: ReferencedTablePolicy,
) -> Result<Introspection> {
    let all = source.list_tables().await.map_err(|e| match e {
        MigrateError::Connectivity(_) | MigrateError::CatalogRead(_) => e,
        other => MigrateError::CatalogRead(other.to_string()),
    })?;
    debug!("Source catalog lists {} tables", all.len());

    let mut result = Introspection::default();

    let selected: Vec<String> = if filter.is_empty() {
        all.clone()
    } else {
        let mut names = Vec::new();
        for requested in filter {
            match resolve_table_name(&all, requested) {
                Ok(name) => {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                Err(reason) => {
                    warn!("{}", reason);
                    result.failures.push(IntrospectionFailure {
                        table: requested.clone(),
                        reason,
                    });
                }
            }
        }
        names
    };

    let mut wanted: BTreeSet<String> = selected.iter().cloned().collect();
    let mut queue: VecDeque<String> = selected.into_iter().collect();
    let mut loaded: BTreeMap<String, TableSpec> = BTreeMap::new();

    while let Some(name) = queue.pop_front() {
        if loaded.contains_key(&name) || result.failures.iter().any(|f| f.table == name) {
            continue;
        }

        let mut table = match source.load_table(&name).await {
            Ok(table) => table,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Failed to read metadata for {}: {}", name, e);
                result.failures.push(IntrospectionFailure {
                    table: name,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let mut dropped = Vec::new();
        for fk in &table.foreign_keys {
            let referenced = &fk.ref_table;
            if *referenced == table.name || wanted.contains(referenced) {
                continue;
            }
            if !all.contains(referenced) {
                return Err(MigrateError::SchemaInconsistency(format!(
                    "foreign key {} on {} references unknown table {}",
                    fk.name, table.name, referenced
                )));
            }
            match policy {
                ReferencedTablePolicy::Include => {
                    info!(
                        "Including {} (referenced by {} through {})",
                        referenced, table.name, fk.name
                    );
                    wanted.insert(referenced.clone());
                    queue.push_back(referenced.clone());
                }
                ReferencedTablePolicy::Fail => {
                    return Err(MigrateError::SchemaInconsistency(format!(
                        "foreign key {} on {} references {}, which is outside the table filter",
                        fk.name, table.name, referenced
                    )));
                }
                ReferencedTablePolicy::Ignore => dropped.push(fk.name.clone()),
            }
        }

        if !dropped.is_empty() {
            table.foreign_keys.retain(|fk| !dropped.contains(&fk.name));
            for fk in dropped {
                let note = format!(
                    "{}: foreign key {} dropped, referenced table not migrated",
                    table.name, fk
                );
                warn!("{}", note);
                result.warnings.push(note);
            }
        }

        debug!(
            "{}: {} columns, {} foreign keys, {} indexes",
            table.name,
            table.columns.len(),
            table.foreign_keys.len(),
            table.indexes.len()
        );
        loaded.insert(name, table);
    }

    result.tables = loaded.into_values().collect();
    info!(
        "Introspected {} tables ({} failed)",
        result.tables.len(),
        result.failures.len()
    );
    Ok(result)
}

/// Exact match first, then a unique case-insensitive match.
fn resolve_table_name(all: &[String], requested: &str) -> std::result::Result<String, String> {
    let requested = requested.trim();
    if let Some(exact) = all.iter().find(|t| *t == requested) {
        return Ok(exact.clone());
    }

    let matches: Vec<&String> = all
        .iter()
        .filter(|t| t.eq_ignore_ascii_case(requested))
        .collect();
    match matches.as_slice() {
        [one] => Ok((*one).clone()),
        [] => Err(format!("table {} not found in source catalog", requested)),
        _ => Err(format!(
            "table {} is ambiguous: matches {}",
            requested,
            matches.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_exact_before_case_insensitive() {
        let all = names(&["Orders", "ORDERS", "CUSTOMER"]);
        assert_eq!(resolve_table_name(&all, "ORDERS").unwrap(), "ORDERS");
        assert_eq!(resolve_table_name(&all, "customer").unwrap(), "CUSTOMER");
        assert!(resolve_table_name(&all, "orders").unwrap_err().contains("ambiguous"));
        assert!(resolve_table_name(&all, "NOPE").unwrap_err().contains("not found"));
    }
}
