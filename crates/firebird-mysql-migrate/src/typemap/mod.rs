//! Type mapping from Firebird to MySQL.
//!
//! Source type names are the normalized names produced by
//! [`crate::source::catalog::decode_field_type`]. Every value a source type
//! can hold must be representable by its target type; the few exceptions
//! (DECFLOAT, time zone types) are reported as lossy.

mod defaults;

pub use defaults::{translate_default, TranslatedDefault};

use crate::core::schema::ColumnSpec;
use crate::core::traits::{with_column_context, TargetKind, TypeMapper, TypeMapping};
use crate::error::{MigrateError, Result};

/// Largest CHAR length MySQL accepts.
const MYSQL_MAX_CHAR: i32 = 255;

/// Largest VARCHAR that fits the 65535-byte row limit at 4 bytes per utf8mb4 character.
pub const MYSQL_MAX_VARCHAR_UTF8MB4: i32 = 16383;

/// Largest VARBINARY/BINARY length kept inline.
const MYSQL_MAX_VARBINARY: i32 = 65535;

const MYSQL_MAX_DECIMAL_PRECISION: i32 = 65;
const MYSQL_MAX_DECIMAL_SCALE: i32 = 30;

/// Firebird to MySQL type mapper.
#[derive(Debug, Clone, Default)]
pub struct FirebirdToMysqlMapper {
    /// Treat SMALLINT columns on `*BOOL*` domains as booleans.
    pub detect_boolean_domains: bool,
}

impl FirebirdToMysqlMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boolean_domains(mut self, enabled: bool) -> Self {
        self.detect_boolean_domains = enabled;
        self
    }
}

impl TypeMapper for FirebirdToMysqlMapper {
    fn map_type(
        &self,
        data_type: &str,
        max_length: i32,
        precision: i32,
        scale: i32,
    ) -> Result<TypeMapping> {
        firebird_to_mysql(data_type, max_length, precision, scale)
    }

    fn map_column(&self, table: &str, col: &ColumnSpec) -> Result<TypeMapping> {
        // Pre-BOOLEAN databases model flags as SMALLINT domains (D_BOOL, BOOLEAN_T, ...)
        if self.detect_boolean_domains
            && col.data_type == "SMALLINT"
            && col
                .domain
                .as_deref()
                .is_some_and(|d| d.to_uppercase().contains("BOOL"))
        {
            return Ok(TypeMapping::lossless("TINYINT(1)", TargetKind::Bool));
        }

        if col.is_binary() && col.data_type != "BLOB" {
            return Ok(map_binary_string(&col.data_type, col.max_length));
        }

        self.map_type(&col.data_type, col.max_length, col.precision, col.scale)
            .map_err(|e| with_column_context(e, table, &col.name))
    }
}

/// Map a Firebird type to MySQL.
pub fn firebird_to_mysql(
    data_type: &str,
    max_length: i32,
    precision: i32,
    scale: i32,
) -> Result<TypeMapping> {
    let mapping = match data_type.to_uppercase().as_str() {
        // Boolean (Firebird 3+)
        "BOOLEAN" => TypeMapping::lossless("TINYINT(1)", TargetKind::Bool),

        // Integer types
        "SMALLINT" => TypeMapping::lossless("SMALLINT", TargetKind::SmallInt),
        "INTEGER" => TypeMapping::lossless("INT", TargetKind::Int),
        "BIGINT" => TypeMapping::lossless("BIGINT", TargetKind::BigInt),
        "INT128" => decimal(39, 0),

        // Fixed point
        "NUMERIC" | "DECIMAL" => {
            if scale > MYSQL_MAX_DECIMAL_SCALE || precision > MYSQL_MAX_DECIMAL_PRECISION {
                return Err(MigrateError::unsupported(
                    "",
                    "",
                    format!("{}({},{})", data_type, precision, scale),
                ));
            }
            let precision = if precision > 0 { precision } else { 18 };
            decimal(precision.max(scale), scale.max(0))
        }

        // Floating point
        "FLOAT" => TypeMapping::lossless("FLOAT", TargetKind::Float),
        "DOUBLE PRECISION" | "DOUBLE" => TypeMapping::lossless("DOUBLE", TargetKind::Double),
        "DECFLOAT(16)" => TypeMapping::lossy(
            "VARCHAR(24)",
            TargetKind::Varchar { length: 24 },
            "DECFLOAT(16) has no MySQL equivalent; stored as text",
        ),
        "DECFLOAT(34)" | "DECFLOAT" => TypeMapping::lossy(
            "VARCHAR(42)",
            TargetKind::Varchar { length: 42 },
            "DECFLOAT(34) has no MySQL equivalent; stored as text",
        ),

        // Character types
        "CHAR" => {
            if max_length > 0 && max_length <= MYSQL_MAX_CHAR {
                TypeMapping::lossless(
                    format!("CHAR({})", max_length),
                    TargetKind::Char {
                        length: max_length as u32,
                    },
                )
            } else {
                varchar_or_text(max_length)
            }
        }
        "VARCHAR" | "CSTRING" => varchar_or_text(max_length),
        "BLOB SUB_TYPE TEXT" => TypeMapping::lossless("LONGTEXT", TargetKind::Text),

        // Binary
        "BLOB" => TypeMapping::lossless("LONGBLOB", TargetKind::Blob),

        // Date/time. Firebird keeps 1/10000 s, so 4 fractional digits are exact.
        "DATE" => TypeMapping::lossless("DATE", TargetKind::Date),
        "TIME" => TypeMapping::lossless("TIME(4)", TargetKind::Time),
        "TIMESTAMP" => TypeMapping::lossless("DATETIME(4)", TargetKind::DateTime),
        "TIME WITH TIME ZONE" => TypeMapping::lossy(
            "TIME(4)",
            TargetKind::Time,
            "TIME WITH TIME ZONE normalized to UTC; zone dropped",
        ),
        "TIMESTAMP WITH TIME ZONE" => TypeMapping::lossy(
            "DATETIME(4)",
            TargetKind::DateTime,
            "TIMESTAMP WITH TIME ZONE normalized to UTC; zone dropped",
        ),

        _ => return Err(MigrateError::unsupported("", "", data_type)),
    };

    Ok(mapping)
}

fn decimal(precision: i32, scale: i32) -> TypeMapping {
    TypeMapping::lossless(
        format!("DECIMAL({},{})", precision, scale),
        TargetKind::Decimal {
            precision: precision as u32,
            scale: scale as u32,
        },
    )
}

fn varchar_or_text(max_length: i32) -> TypeMapping {
    if max_length > 0 && max_length <= MYSQL_MAX_VARCHAR_UTF8MB4 {
        TypeMapping::lossless(
            format!("VARCHAR({})", max_length),
            TargetKind::Varchar {
                length: max_length as u32,
            },
        )
    } else {
        TypeMapping::lossless("LONGTEXT", TargetKind::Text)
    }
}

/// CHAR/VARCHAR declared `CHARACTER SET OCTETS`.
fn map_binary_string(data_type: &str, max_length: i32) -> TypeMapping {
    let length = max_length.max(1);
    match data_type {
        "CHAR" if length <= MYSQL_MAX_CHAR => TypeMapping::lossless(
            format!("BINARY({})", length),
            TargetKind::Binary {
                length: length as u32,
            },
        ),
        _ if length <= MYSQL_MAX_VARBINARY => TypeMapping::lossless(
            format!("VARBINARY({})", length),
            TargetKind::Varbinary {
                length: length as u32,
            },
        ),
        _ => TypeMapping::lossless("LONGBLOB", TargetKind::Blob),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(data_type: &str, len: i32, precision: i32, scale: i32) -> String {
        firebird_to_mysql(data_type, len, precision, scale)
            .unwrap()
            .target_type
    }

    #[test]
    fn test_integer_types() {
        assert_eq!(target("SMALLINT", 0, 0, 0), "SMALLINT");
        assert_eq!(target("INTEGER", 0, 0, 0), "INT");
        assert_eq!(target("BIGINT", 0, 0, 0), "BIGINT");
        assert_eq!(target("INT128", 0, 0, 0), "DECIMAL(39,0)");
    }

    #[test]
    fn test_fixed_point_preserves_precision_and_scale() {
        assert_eq!(target("NUMERIC", 0, 15, 2), "DECIMAL(15,2)");
        assert_eq!(target("DECIMAL", 0, 18, 4), "DECIMAL(18,4)");
        assert_eq!(target("NUMERIC", 0, 38, 10), "DECIMAL(38,10)");
        // Precision absent in catalog
        assert_eq!(target("NUMERIC", 0, 0, 2), "DECIMAL(18,2)");
    }

    #[test]
    fn test_fixed_point_scale_over_limit_is_unsupported() {
        let err = firebird_to_mysql("NUMERIC", 0, 38, 31).unwrap_err();
        assert!(matches!(err, MigrateError::UnsupportedType { .. }));
    }

    #[test]
    fn test_floating_point() {
        assert_eq!(target("FLOAT", 0, 0, 0), "FLOAT");
        assert_eq!(target("DOUBLE PRECISION", 0, 0, 0), "DOUBLE");
    }

    #[test]
    fn test_decfloat_is_lossy() {
        let m = firebird_to_mysql("DECFLOAT(34)", 0, 0, 0).unwrap();
        assert!(m.is_lossy);
        assert_eq!(m.kind, TargetKind::Varchar { length: 42 });
    }

    #[test]
    fn test_string_types_keep_length() {
        assert_eq!(target("CHAR", 10, 0, 0), "CHAR(10)");
        assert_eq!(target("VARCHAR", 100, 0, 0), "VARCHAR(100)");
        assert_eq!(target("CSTRING", 20, 0, 0), "VARCHAR(20)");
        assert_eq!(target("VARCHAR", 16383, 0, 0), "VARCHAR(16383)");
    }

    #[test]
    fn test_long_strings_become_longtext() {
        assert_eq!(target("VARCHAR", 32765, 0, 0), "LONGTEXT");
        assert_eq!(target("CHAR", 300, 0, 0), "VARCHAR(300)");
        assert_eq!(target("CHAR", 32767, 0, 0), "LONGTEXT");
    }

    #[test]
    fn test_blobs() {
        assert_eq!(target("BLOB SUB_TYPE TEXT", 0, 0, 0), "LONGTEXT");
        assert_eq!(target("BLOB", 0, 0, 0), "LONGBLOB");
    }

    #[test]
    fn test_datetime_types() {
        assert_eq!(target("DATE", 0, 0, 0), "DATE");
        assert_eq!(target("TIME", 0, 0, 0), "TIME(4)");
        assert_eq!(target("TIMESTAMP", 0, 0, 0), "DATETIME(4)");
    }

    #[test]
    fn test_time_zone_types_are_lossy() {
        let m = firebird_to_mysql("TIMESTAMP WITH TIME ZONE", 0, 0, 0).unwrap();
        assert_eq!(m.target_type, "DATETIME(4)");
        assert!(m.is_lossy);
        assert!(m.warning.unwrap().contains("UTC"));
    }

    #[test]
    fn test_boolean() {
        let m = firebird_to_mysql("BOOLEAN", 0, 0, 0).unwrap();
        assert_eq!(m.target_type, "TINYINT(1)");
        assert_eq!(m.kind, TargetKind::Bool);
    }

    #[test]
    fn test_unknown_type_carries_original_name() {
        let err = firebird_to_mysql("QUAD", 0, 0, 0).unwrap_err();
        match err {
            MigrateError::UnsupportedType { source_type, .. } => assert_eq!(source_type, "QUAD"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_boolean_domain_heuristic_is_opt_in() {
        let col = ColumnSpec::new("ACTIVE", "SMALLINT").with_domain("D_BOOLEAN");

        let plain = FirebirdToMysqlMapper::new();
        assert_eq!(plain.map_column("USERS", &col).unwrap().kind, TargetKind::SmallInt);

        let heuristic = FirebirdToMysqlMapper::new().with_boolean_domains(true);
        let m = heuristic.map_column("USERS", &col).unwrap();
        assert_eq!(m.target_type, "TINYINT(1)");
        assert_eq!(m.kind, TargetKind::Bool);

        // Non-boolean domain stays numeric
        let qty = ColumnSpec::new("QTY", "SMALLINT").with_domain("D_QUANTITY");
        assert_eq!(heuristic.map_column("USERS", &qty).unwrap().kind, TargetKind::SmallInt);
    }

    #[test]
    fn test_octets_strings_map_to_binary() {
        let mapper = FirebirdToMysqlMapper::new();
        let uuid = ColumnSpec::new("ID", "CHAR").with_length(16).with_charset("OCTETS");
        assert_eq!(mapper.map_column("T", &uuid).unwrap().target_type, "BINARY(16)");

        let raw = ColumnSpec::new("RAW", "VARCHAR").with_length(400).with_charset("OCTETS");
        assert_eq!(mapper.map_column("T", &raw).unwrap().target_type, "VARBINARY(400)");
    }

    #[test]
    fn test_map_column_adds_context() {
        let mapper = FirebirdToMysqlMapper::new();
        let col = ColumnSpec::new("GRID", "ARRAY OF INTEGER");
        let err = mapper.map_column("MATRIX", &col).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported type 'ARRAY OF INTEGER' for column MATRIX.GRID"
        );
    }
}
