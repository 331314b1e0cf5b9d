//! Firebird system catalog queries and decoding.
//!
//! Everything here is pure: SQL text in, catalog rows (as text, the way the
//! ODBC text buffers return them) out. The live reader in `firebird.rs`
//! executes the SQL; tests feed rows directly.

use crate::core::schema::{ColumnSpec, ForeignKeySpec, IndexSpec, ReferentialAction};
use crate::error::{MigrateError, Result};

/// A catalog result row as returned by a text fetch.
pub type CatalogRow = Vec<Option<String>>;

/// User tables, excluding views and system relations.
pub const LIST_TABLES_SQL: &str = "\
SELECT TRIM(r.RDB$RELATION_NAME)
FROM RDB$RELATIONS r
WHERE COALESCE(r.RDB$SYSTEM_FLAG, 0) = 0
  AND r.RDB$VIEW_BLR IS NULL
ORDER BY r.RDB$RELATION_NAME";

/// Escape a string literal: `O'Brien` -> `O''Brien`.
pub fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Quote a Firebird dialect-3 identifier.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Column metadata in declaration order. See [`parse_columns`] for the layout.
pub fn columns_sql(table: &str) -> String {
    format!(
        "\
SELECT
    TRIM(rf.RDB$FIELD_NAME),
    f.RDB$FIELD_TYPE,
    f.RDB$FIELD_SUB_TYPE,
    f.RDB$FIELD_LENGTH,
    f.RDB$CHARACTER_LENGTH,
    f.RDB$FIELD_PRECISION,
    f.RDB$FIELD_SCALE,
    COALESCE(rf.RDB$NULL_FLAG, f.RDB$NULL_FLAG, 0),
    COALESCE(rf.RDB$DEFAULT_SOURCE, f.RDB$DEFAULT_SOURCE),
    TRIM(rf.RDB$FIELD_SOURCE),
    TRIM(cs.RDB$CHARACTER_SET_NAME),
    COALESCE(f.RDB$DIMENSIONS, 0),
    CASE WHEN f.RDB$COMPUTED_BLR IS NULL THEN 0 ELSE 1 END,
    rf.RDB$FIELD_POSITION
FROM RDB$RELATION_FIELDS rf
JOIN RDB$FIELDS f ON f.RDB$FIELD_NAME = rf.RDB$FIELD_SOURCE
LEFT JOIN RDB$CHARACTER_SETS cs ON cs.RDB$CHARACTER_SET_ID = f.RDB$CHARACTER_SET_ID
WHERE rf.RDB$RELATION_NAME = '{}'
ORDER BY rf.RDB$FIELD_POSITION",
        escape_literal(table)
    )
}

/// Primary key columns in key order.
pub fn primary_key_sql(table: &str) -> String {
    format!(
        "\
SELECT TRIM(seg.RDB$FIELD_NAME)
FROM RDB$RELATION_CONSTRAINTS rc
JOIN RDB$INDEX_SEGMENTS seg ON seg.RDB$INDEX_NAME = rc.RDB$INDEX_NAME
WHERE rc.RDB$RELATION_NAME = '{}'
  AND rc.RDB$CONSTRAINT_TYPE = 'PRIMARY KEY'
ORDER BY seg.RDB$FIELD_POSITION",
        escape_literal(table)
    )
}

/// Foreign key columns, one row per column pair. See [`parse_foreign_keys`].
pub fn foreign_keys_sql(table: &str) -> String {
    format!(
        "\
SELECT
    TRIM(rc.RDB$CONSTRAINT_NAME),
    TRIM(seg.RDB$FIELD_NAME),
    TRIM(ref_rc.RDB$RELATION_NAME),
    TRIM(ref_seg.RDB$FIELD_NAME),
    TRIM(refc.RDB$UPDATE_RULE),
    TRIM(refc.RDB$DELETE_RULE)
FROM RDB$RELATION_CONSTRAINTS rc
JOIN RDB$REF_CONSTRAINTS refc ON refc.RDB$CONSTRAINT_NAME = rc.RDB$CONSTRAINT_NAME
JOIN RDB$RELATION_CONSTRAINTS ref_rc ON ref_rc.RDB$CONSTRAINT_NAME = refc.RDB$CONST_NAME_UQ
JOIN RDB$INDEX_SEGMENTS seg ON seg.RDB$INDEX_NAME = rc.RDB$INDEX_NAME
JOIN RDB$INDEX_SEGMENTS ref_seg ON ref_seg.RDB$INDEX_NAME = ref_rc.RDB$INDEX_NAME
    AND ref_seg.RDB$FIELD_POSITION = seg.RDB$FIELD_POSITION
WHERE rc.RDB$RELATION_NAME = '{}'
  AND rc.RDB$CONSTRAINT_TYPE = 'FOREIGN KEY'
ORDER BY rc.RDB$CONSTRAINT_NAME, seg.RDB$FIELD_POSITION",
        escape_literal(table)
    )
}

/// Plain and UNIQUE-constraint indexes, one row per segment. See [`parse_indexes`].
///
/// Indexes backing primary and foreign keys are excluded, as are expression indexes.
pub fn indexes_sql(table: &str) -> String {
    format!(
        "\
SELECT
    TRIM(i.RDB$INDEX_NAME),
    COALESCE(i.RDB$UNIQUE_FLAG, 0),
    COALESCE(i.RDB$INDEX_TYPE, 0),
    TRIM(seg.RDB$FIELD_NAME)
FROM RDB$INDICES i
JOIN RDB$INDEX_SEGMENTS seg ON seg.RDB$INDEX_NAME = i.RDB$INDEX_NAME
LEFT JOIN RDB$RELATION_CONSTRAINTS rc ON rc.RDB$INDEX_NAME = i.RDB$INDEX_NAME
WHERE i.RDB$RELATION_NAME = '{}'
  AND COALESCE(i.RDB$SYSTEM_FLAG, 0) = 0
  AND i.RDB$EXPRESSION_BLR IS NULL
  AND (rc.RDB$CONSTRAINT_TYPE IS NULL OR rc.RDB$CONSTRAINT_TYPE = 'UNIQUE')
ORDER BY i.RDB$INDEX_NAME, seg.RDB$FIELD_POSITION",
        escape_literal(table)
    )
}

pub fn row_count_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(table))
}

/// Forward-only scan of the given columns.
pub fn select_rows_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    format!("SELECT {} FROM {}", cols.join(", "), quote_ident(table))
}

/// Normalized type information decoded from `RDB$FIELDS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedType {
    pub data_type: String,
    pub max_length: i32,
    pub precision: i32,
    pub scale: i32,
}

/// Raw `RDB$FIELDS` type attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldType {
    pub field_type: i32,
    pub sub_type: i32,
    pub field_length: i32,
    pub char_length: Option<i32>,
    pub precision: i32,
    /// Stored negative for scaled numerics.
    pub scale: i32,
    pub dimensions: i32,
}

/// Decode a Firebird field type code into a normalized type name.
pub fn decode_field_type(ft: FieldType) -> DecodedType {
    let mut decoded = DecodedType {
        data_type: String::new(),
        max_length: 0,
        precision: 0,
        scale: 0,
    };

    let scaled = matches!(ft.field_type, 7 | 8 | 16 | 26)
        && (ft.sub_type == 1 || ft.sub_type == 2 || ft.scale < 0);

    decoded.data_type = if scaled {
        decoded.precision = if ft.precision > 0 {
            ft.precision
        } else {
            // Storage-implied precision when the catalog leaves it empty (dialect 1)
            match ft.field_type {
                7 => 4,
                8 => 9,
                16 => 18,
                _ => 38,
            }
        };
        decoded.scale = -ft.scale;
        if ft.sub_type == 2 { "DECIMAL" } else { "NUMERIC" }.to_string()
    } else {
        match ft.field_type {
            7 => "SMALLINT",
            8 => "INTEGER",
            9 => "QUAD",
            10 => "FLOAT",
            11 | 27 => "DOUBLE PRECISION",
            12 => "DATE",
            13 => "TIME",
            14 => "CHAR",
            16 => "BIGINT",
            23 => "BOOLEAN",
            24 => "DECFLOAT(16)",
            25 => "DECFLOAT(34)",
            26 => "INT128",
            28 => "TIME WITH TIME ZONE",
            29 => "TIMESTAMP WITH TIME ZONE",
            35 => "TIMESTAMP",
            37 => "VARCHAR",
            40 => "CSTRING",
            261 if ft.sub_type == 1 => "BLOB SUB_TYPE TEXT",
            261 => "BLOB",
            other => return DecodedType {
                data_type: format!("UNKNOWN TYPE {}", other),
                ..decoded
            },
        }
        .to_string()
    };

    if matches!(ft.field_type, 14 | 37 | 40) {
        decoded.max_length = ft.char_length.filter(|&n| n > 0).unwrap_or(ft.field_length);
    }

    if ft.dimensions > 0 {
        decoded.data_type = format!("ARRAY OF {}", decoded.data_type);
    }

    decoded
}

/// Strip the `DEFAULT` keyword Firebird keeps in `RDB$DEFAULT_SOURCE`.
pub fn clean_default_source(source: &str) -> Option<String> {
    let s = source.trim();
    let body = match s.get(..7) {
        Some(head) if head.eq_ignore_ascii_case("DEFAULT") => s[7..].trim(),
        _ => s,
    };
    (!body.is_empty()).then(|| body.to_string())
}

/// Parse rows of [`columns_sql`]. Computed columns are skipped.
pub fn parse_columns(table: &str, rows: &[CatalogRow]) -> Result<Vec<ColumnSpec>> {
    let mut columns = Vec::with_capacity(rows.len());

    for row in rows {
        let name = text_at(row, 0).ok_or_else(|| {
            MigrateError::CatalogRead(format!("column without a name in table {}", table))
        })?;

        if int_at(row, 12)? != 0 {
            continue;
        }

        let decoded = decode_field_type(FieldType {
            field_type: int_at(row, 1)?,
            sub_type: int_at(row, 2)?,
            field_length: int_at(row, 3)?,
            char_length: opt_int_at(row, 4)?,
            precision: int_at(row, 5)?,
            scale: int_at(row, 6)?,
            dimensions: int_at(row, 11)?,
        });

        let domain = text_at(row, 9).filter(|d| !d.starts_with("RDB$"));

        columns.push(ColumnSpec {
            name,
            data_type: decoded.data_type,
            max_length: decoded.max_length,
            precision: decoded.precision,
            scale: decoded.scale,
            is_nullable: int_at(row, 7)? == 0,
            default: text_at(row, 8).and_then(|d| clean_default_source(&d)),
            domain,
            charset: text_at(row, 10),
            ordinal_pos: opt_int_at(row, 13)?.map(|p| p + 1).unwrap_or(columns.len() as i32 + 1),
        });
    }

    Ok(columns)
}

/// Parse single-column name lists ([`LIST_TABLES_SQL`], [`primary_key_sql`]).
pub fn parse_names(rows: &[CatalogRow]) -> Vec<String> {
    rows.iter().filter_map(|r| text_at(r, 0)).collect()
}

/// Parse rows of [`foreign_keys_sql`], grouping consecutive rows by constraint.
pub fn parse_foreign_keys(rows: &[CatalogRow]) -> Result<Vec<ForeignKeySpec>> {
    let mut fks: Vec<ForeignKeySpec> = Vec::new();

    for row in rows {
        let name = required(row, 0, "foreign key name")?;
        let column = required(row, 1, "foreign key column")?;
        let ref_table = required(row, 2, "referenced table")?;
        let ref_column = required(row, 3, "referenced column")?;

        match fks.last_mut() {
            Some(fk) if fk.name == name => {
                fk.columns.push(column);
                fk.ref_columns.push(ref_column);
            }
            _ => fks.push(ForeignKeySpec {
                name,
                columns: vec![column],
                ref_table,
                ref_columns: vec![ref_column],
                on_update: ReferentialAction::parse(&text_at(row, 4).unwrap_or_default()),
                on_delete: ReferentialAction::parse(&text_at(row, 5).unwrap_or_default()),
            }),
        }
    }

    Ok(fks)
}

/// Parse rows of [`indexes_sql`], grouping consecutive rows by index.
pub fn parse_indexes(rows: &[CatalogRow]) -> Result<Vec<IndexSpec>> {
    let mut indexes: Vec<IndexSpec> = Vec::new();

    for row in rows {
        let name = required(row, 0, "index name")?;
        let column = required(row, 3, "index column")?;

        match indexes.last_mut() {
            Some(idx) if idx.name == name => idx.columns.push(column),
            _ => indexes.push(IndexSpec {
                name,
                columns: vec![column],
                is_unique: int_at(row, 1)? == 1,
                is_descending: int_at(row, 2)? == 1,
            }),
        }
    }

    Ok(indexes)
}

fn text_at(row: &CatalogRow, idx: usize) -> Option<String> {
    row.get(idx)
        .and_then(|v| v.as_deref())
        .map(|s| s.trim_end().to_string())
        .filter(|s| !s.is_empty())
}

fn required(row: &CatalogRow, idx: usize, what: &str) -> Result<String> {
    text_at(row, idx).ok_or_else(|| MigrateError::CatalogRead(format!("missing {}", what)))
}

fn opt_int_at(row: &CatalogRow, idx: usize) -> Result<Option<i32>> {
    match row.get(idx).and_then(|v| v.as_deref()).map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<i32>().map(Some).map_err(|_| {
            MigrateError::CatalogRead(format!("expected an integer in catalog column {}, got '{}'", idx, s))
        }),
    }
}

fn int_at(row: &CatalogRow, idx: usize) -> Result<i32> {
    Ok(opt_int_at(row, idx)?.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[Option<&str>]) -> CatalogRow {
        values.iter().map(|v| v.map(|s| s.to_string())).collect()
    }

    fn ft(field_type: i32) -> FieldType {
        FieldType {
            field_type,
            ..FieldType::default()
        }
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(decode_field_type(ft(7)).data_type, "SMALLINT");
        assert_eq!(decode_field_type(ft(8)).data_type, "INTEGER");
        assert_eq!(decode_field_type(ft(16)).data_type, "BIGINT");
        assert_eq!(decode_field_type(ft(26)).data_type, "INT128");
    }

    #[test]
    fn test_decode_scaled_numerics() {
        let d = decode_field_type(FieldType {
            field_type: 16,
            sub_type: 1,
            precision: 15,
            scale: -2,
            ..FieldType::default()
        });
        assert_eq!(d.data_type, "NUMERIC");
        assert_eq!((d.precision, d.scale), (15, 2));

        let d = decode_field_type(FieldType {
            field_type: 8,
            sub_type: 2,
            precision: 9,
            scale: -3,
            ..FieldType::default()
        });
        assert_eq!(d.data_type, "DECIMAL");
        assert_eq!((d.precision, d.scale), (9, 3));
    }

    #[test]
    fn test_decode_dialect1_numeric_without_precision() {
        let d = decode_field_type(FieldType {
            field_type: 8,
            sub_type: 0,
            scale: -2,
            ..FieldType::default()
        });
        assert_eq!(d.data_type, "NUMERIC");
        assert_eq!((d.precision, d.scale), (9, 2));
    }

    #[test]
    fn test_decode_strings_use_character_length() {
        let d = decode_field_type(FieldType {
            field_type: 37,
            field_length: 400,
            char_length: Some(100),
            ..FieldType::default()
        });
        assert_eq!(d.data_type, "VARCHAR");
        assert_eq!(d.max_length, 100);

        let d = decode_field_type(FieldType {
            field_type: 14,
            field_length: 16,
            char_length: None,
            ..FieldType::default()
        });
        assert_eq!(d.data_type, "CHAR");
        assert_eq!(d.max_length, 16);
    }

    #[test]
    fn test_decode_blobs_and_dates() {
        let text = decode_field_type(FieldType {
            field_type: 261,
            sub_type: 1,
            ..FieldType::default()
        });
        assert_eq!(text.data_type, "BLOB SUB_TYPE TEXT");
        assert_eq!(decode_field_type(ft(261)).data_type, "BLOB");
        assert_eq!(decode_field_type(ft(12)).data_type, "DATE");
        assert_eq!(decode_field_type(ft(13)).data_type, "TIME");
        assert_eq!(decode_field_type(ft(35)).data_type, "TIMESTAMP");
        assert_eq!(decode_field_type(ft(29)).data_type, "TIMESTAMP WITH TIME ZONE");
        assert_eq!(decode_field_type(ft(23)).data_type, "BOOLEAN");
    }

    #[test]
    fn test_decode_arrays_and_unknown() {
        let d = decode_field_type(FieldType {
            field_type: 8,
            dimensions: 1,
            ..FieldType::default()
        });
        assert_eq!(d.data_type, "ARRAY OF INTEGER");
        assert_eq!(decode_field_type(ft(99)).data_type, "UNKNOWN TYPE 99");
    }

    #[test]
    fn test_clean_default_source() {
        assert_eq!(clean_default_source("DEFAULT 0").as_deref(), Some("0"));
        assert_eq!(clean_default_source("default 'NOW'").as_deref(), Some("'NOW'"));
        assert_eq!(clean_default_source("  DEFAULT   ").as_deref(), None);
    }

    #[test]
    fn test_parse_columns() {
        let rows = vec![
            row(&[
                Some("CUST_NO"), Some("8"), Some("0"), Some("4"), None, Some("0"), Some("0"),
                Some("1"), None, Some("CUSTNO"), None, Some("0"), Some("0"), Some("0"),
            ]),
            row(&[
                Some("CUSTOMER"), Some("37"), Some("0"), Some("100"), Some("25"), None, Some("0"),
                Some("0"), Some("DEFAULT 'N/A'"), Some("RDB$12"), Some("UTF8"), Some("0"),
                Some("0"), Some("1"),
            ]),
            row(&[
                Some("FULL_NAME"), Some("37"), Some("0"), Some("200"), Some("50"), None, Some("0"),
                Some("0"), None, Some("RDB$13"), Some("UTF8"), Some("0"), Some("1"), Some("2"),
            ]),
        ];

        let cols = parse_columns("CUSTOMER", &rows).unwrap();
        assert_eq!(cols.len(), 2, "computed column skipped");

        assert_eq!(cols[0].name, "CUST_NO");
        assert_eq!(cols[0].data_type, "INTEGER");
        assert!(!cols[0].is_nullable);
        assert_eq!(cols[0].domain.as_deref(), Some("CUSTNO"));
        assert_eq!(cols[0].ordinal_pos, 1);

        assert_eq!(cols[1].data_type, "VARCHAR");
        assert_eq!(cols[1].max_length, 25);
        assert!(cols[1].is_nullable);
        assert_eq!(cols[1].default.as_deref(), Some("'N/A'"));
        assert_eq!(cols[1].domain, None);
        assert_eq!(cols[1].charset.as_deref(), Some("UTF8"));
    }

    #[test]
    fn test_parse_columns_bad_integer() {
        let rows = vec![row(&[Some("X"), Some("eight")])];
        assert!(matches!(
            parse_columns("T", &rows),
            Err(MigrateError::CatalogRead(_))
        ));
    }

    #[test]
    fn test_parse_composite_foreign_key() {
        let rows = vec![
            row(&[Some("FK_ITEM_ORDER"), Some("ORDER_ID"), Some("ORDERS"), Some("ID"), Some("RESTRICT"), Some("CASCADE")]),
            row(&[Some("FK_ITEM_ORDER"), Some("ORDER_REV"), Some("ORDERS"), Some("REV"), Some("RESTRICT"), Some("CASCADE")]),
            row(&[Some("FK_ITEM_PRODUCT"), Some("PRODUCT_ID"), Some("PRODUCT"), Some("ID"), Some("NO ACTION"), Some("SET NULL")]),
        ];

        let fks = parse_foreign_keys(&rows).unwrap();
        assert_eq!(fks.len(), 2);
        assert_eq!(fks[0].columns, vec!["ORDER_ID", "ORDER_REV"]);
        assert_eq!(fks[0].ref_columns, vec!["ID", "REV"]);
        assert_eq!(fks[0].on_delete, ReferentialAction::Cascade);
        assert_eq!(fks[0].on_update, ReferentialAction::Restrict);
        assert_eq!(fks[1].ref_table, "PRODUCT");
        assert_eq!(fks[1].on_delete, ReferentialAction::SetNull);
    }

    #[test]
    fn test_parse_indexes() {
        let rows = vec![
            row(&[Some("IDX_NAME"), Some("0"), Some("0"), Some("LAST_NAME")]),
            row(&[Some("IDX_NAME"), Some("0"), Some("0"), Some("FIRST_NAME")]),
            row(&[Some("UQ_EMAIL"), Some("1"), Some("1"), Some("EMAIL")]),
        ];

        let idx = parse_indexes(&rows).unwrap();
        assert_eq!(idx.len(), 2);
        assert_eq!(idx[0].columns, vec!["LAST_NAME", "FIRST_NAME"]);
        assert!(!idx[0].is_unique);
        assert!(idx[1].is_unique);
        assert!(idx[1].is_descending);
    }

    #[test]
    fn test_sql_escaping() {
        assert!(columns_sql("O'NEIL").contains("= 'O''NEIL'"));
        assert_eq!(row_count_sql("Order \"Lines\""), "SELECT COUNT(*) FROM \"Order \"\"Lines\"\"\"");
        let cols = vec![ColumnSpec::new("ID", "INTEGER"), ColumnSpec::new("Note", "VARCHAR")];
        assert_eq!(select_rows_sql("T", &cols), "SELECT \"ID\", \"Note\" FROM \"T\"");
    }
}
