//! Migration plan: everything decided before the first statement runs.

use std::collections::BTreeMap;

use crate::config::RunMode;
use crate::core::schema::TableSpec;
use crate::ddl::{SchemaScript, SkippedTable, SynthesisPolicy};
use crate::source::IntrospectionFailure;

/// Immutable description of one run.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub mode: RunMode,
    /// Tables after filtering and FK inclusion, minus the blocked ones.
    pub tables: Vec<TableSpec>,
    pub policy: SynthesisPolicy,
    /// Generated DDL and mapped tables.
    pub script: SchemaScript,
    pub workers: usize,
    pub batch_size: usize,
    pub trim_char_padding: bool,
    /// Tables whose metadata could not be read.
    pub introspection_failures: Vec<IntrospectionFailure>,
    /// Tables referencing an unreadable table, directly or transitively.
    pub blocked: Vec<SkippedTable>,
    pub warnings: Vec<String>,
}

/// Split off tables that reference a table whose metadata failed to load.
pub(crate) fn split_blocked(
    tables: Vec<TableSpec>,
    failures: &[IntrospectionFailure],
) -> (Vec<TableSpec>, Vec<SkippedTable>) {
    let mut blocked: BTreeMap<String, String> = failures
        .iter()
        .map(|f| (f.table.clone(), f.table.clone()))
        .collect();

    loop {
        let mut changed = false;
        for t in &tables {
            if blocked.contains_key(&t.name) {
                continue;
            }
            let cause = t
                .foreign_keys
                .iter()
                .filter(|fk| fk.ref_table != t.name)
                .find_map(|fk| blocked.get(&fk.ref_table).cloned());
            if let Some(cause) = cause {
                blocked.insert(t.name.clone(), cause);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut skipped = Vec::new();
    let mut kept = Vec::new();
    for t in tables {
        match blocked.get(&t.name) {
            Some(cause) => skipped.push(SkippedTable {
                table: t.name.clone(),
                blocked_by: cause.clone(),
            }),
            None => kept.push(t),
        }
    }
    (kept, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnSpec, ForeignKeySpec, ReferentialAction};

    fn table(name: &str, refs: &[&str]) -> TableSpec {
        let mut t = TableSpec::new(name, vec![ColumnSpec::new("ID", "INTEGER")]);
        t.foreign_keys = refs
            .iter()
            .map(|r| ForeignKeySpec {
                name: format!("FK_{}_{}", name, r),
                columns: vec!["ID".into()],
                ref_table: r.to_string(),
                ref_columns: vec!["ID".into()],
                on_delete: ReferentialAction::NoAction,
                on_update: ReferentialAction::NoAction,
            })
            .collect();
        t
    }

    #[test]
    fn test_blocking_is_transitive() {
        let tables = vec![
            table("A", &["BROKEN"]),
            table("B", &["A"]),
            table("C", &[]),
        ];
        let failures = vec![IntrospectionFailure {
            table: "BROKEN".into(),
            reason: "unreadable".into(),
        }];

        let (kept, skipped) = split_blocked(tables, &failures);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "C");
        assert_eq!(skipped.len(), 2);
        assert!(skipped.iter().all(|s| s.blocked_by == "BROKEN"));
    }
}
