//! Identifier folding and quoting for MySQL.
//!
//! Firebird stores unquoted identifiers in upper case and allows dialect-3
//! quoted names with arbitrary characters. MySQL table names are case
//! sensitive on most Unix installs, so the folding policy is applied once here
//! and every emitted identifier goes through [`normalize`].
//!
//! Identifiers are only wrapped in backticks when MySQL requires it: reserved
//! words, characters outside `[A-Za-z0-9_$]`, or a leading digit. Already
//! quoted input is unwrapped first, which makes `normalize` idempotent.

use crate::error::{MigrateError, Result};

/// MySQL identifier length limit, in characters.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// MySQL 8.0 reserved words.
const RESERVED_WORDS: &[&str] = &[
    "ACCESSIBLE", "ADD", "ALL", "ALTER", "ANALYZE", "AND", "AS", "ASC", "ASENSITIVE",
    "BEFORE", "BETWEEN", "BIGINT", "BINARY", "BLOB", "BOTH", "BY", "CALL", "CASCADE",
    "CASE", "CHANGE", "CHAR", "CHARACTER", "CHECK", "COLLATE", "COLUMN", "CONDITION",
    "CONSTRAINT", "CONTINUE", "CONVERT", "CREATE", "CROSS", "CUBE", "CUME_DIST",
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "CURSOR",
    "DATABASE", "DATABASES", "DAY_HOUR", "DAY_MICROSECOND", "DAY_MINUTE", "DAY_SECOND",
    "DEC", "DECIMAL", "DECLARE", "DEFAULT", "DELAYED", "DELETE", "DENSE_RANK", "DESC",
    "DESCRIBE", "DETERMINISTIC", "DISTINCT", "DISTINCTROW", "DIV", "DOUBLE", "DROP",
    "DUAL", "EACH", "ELSE", "ELSEIF", "EMPTY", "ENCLOSED", "ESCAPED", "EXCEPT", "EXISTS",
    "EXIT", "EXPLAIN", "FALSE", "FETCH", "FIRST_VALUE", "FLOAT", "FLOAT4", "FLOAT8", "FOR",
    "FORCE", "FOREIGN", "FROM", "FULLTEXT", "FUNCTION", "GENERATED", "GET", "GRANT",
    "GROUP", "GROUPING", "GROUPS", "HAVING", "HIGH_PRIORITY", "HOUR_MICROSECOND",
    "HOUR_MINUTE", "HOUR_SECOND", "IF", "IGNORE", "IN", "INDEX", "INFILE", "INNER",
    "INOUT", "INSENSITIVE", "INSERT", "INT", "INT1", "INT2", "INT3", "INT4", "INT8",
    "INTEGER", "INTERSECT", "INTERVAL", "INTO", "IO_AFTER_GTIDS", "IO_BEFORE_GTIDS", "IS",
    "ITERATE", "JOIN", "JSON_TABLE", "KEY", "KEYS", "KILL", "LAG", "LAST_VALUE", "LATERAL",
    "LEAD", "LEADING", "LEAVE", "LEFT", "LIKE", "LIMIT", "LINEAR", "LINES", "LOAD",
    "LOCALTIME", "LOCALTIMESTAMP", "LOCK", "LONG", "LONGBLOB", "LONGTEXT", "LOOP",
    "LOW_PRIORITY", "MASTER_BIND", "MASTER_SSL_VERIFY_SERVER_CERT", "MATCH", "MAXVALUE",
    "MEDIUMBLOB", "MEDIUMINT", "MEDIUMTEXT", "MIDDLEINT", "MINUTE_MICROSECOND",
    "MINUTE_SECOND", "MOD", "MODIFIES", "NATURAL", "NOT", "NO_WRITE_TO_BINLOG",
    "NTH_VALUE", "NTILE", "NULL", "NUMERIC", "OF", "ON", "OPTIMIZE", "OPTIMIZER_COSTS",
    "OPTION", "OPTIONALLY", "OR", "ORDER", "OUT", "OUTER", "OUTFILE", "OVER", "PARTITION",
    "PERCENT_RANK", "PRECISION", "PRIMARY", "PROCEDURE", "PURGE", "RANGE", "RANK", "READ",
    "READS", "READ_WRITE", "REAL", "RECURSIVE", "REFERENCES", "REGEXP", "RELEASE", "RENAME",
    "REPEAT", "REPLACE", "REQUIRE", "RESIGNAL", "RESTRICT", "RETURN", "REVOKE", "RIGHT",
    "RLIKE", "ROW", "ROWS", "ROW_NUMBER", "SCHEMA", "SCHEMAS", "SECOND_MICROSECOND",
    "SELECT", "SENSITIVE", "SEPARATOR", "SET", "SHOW", "SIGNAL", "SMALLINT", "SPATIAL",
    "SPECIFIC", "SQL", "SQLEXCEPTION", "SQLSTATE", "SQLWARNING", "SQL_BIG_RESULT",
    "SQL_CALC_FOUND_ROWS", "SQL_SMALL_RESULT", "SSL", "STARTING", "STORED",
    "STRAIGHT_JOIN", "SYSTEM", "TABLE", "TERMINATED", "THEN", "TINYBLOB", "TINYINT",
    "TINYTEXT", "TO", "TRAILING", "TRIGGER", "TRUE", "UNDO", "UNION", "UNIQUE", "UNLOCK",
    "UNSIGNED", "UPDATE", "USAGE", "USE", "USING", "UTC_DATE", "UTC_TIME", "UTC_TIMESTAMP",
    "VALUES", "VARBINARY", "VARCHAR", "VARCHARACTER", "VARYING", "VIRTUAL", "WHEN",
    "WHERE", "WHILE", "WINDOW", "WITH", "WRITE", "XOR", "YEAR_MONTH", "ZEROFILL",
];

/// Apply the case policy to a raw identifier.
///
/// The result is the name the object will have on the target; it is what
/// `information_schema` lookups compare against.
pub fn fold(ident: &str, lowercase: bool) -> String {
    let raw = unquote(ident).unwrap_or_else(|| ident.to_string());
    if lowercase {
        raw.to_lowercase()
    } else {
        raw
    }
}

/// Fold and, when required, quote an identifier for MySQL DDL and DML.
///
/// # Errors
///
/// Returns `MigrateError::Config` when the folded name cannot exist in MySQL
/// (empty, NUL bytes, trailing space, longer than 64 characters).
pub fn normalize(ident: &str, lowercase: bool) -> Result<String> {
    let name = fold(ident, lowercase);
    validate_identifier(&name)?;

    if needs_quoting(&name) {
        Ok(quote(&name))
    } else {
        Ok(name)
    }
}

/// Quote a MySQL identifier using backticks, regardless of content.
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(quote(name))
}

/// Check whether a name is a MySQL reserved word.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(name))
}

/// Validate a target identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.ends_with(' ') {
        return Err(MigrateError::Config(format!(
            "MySQL identifiers cannot end with a space: {:?}",
            name
        )));
    }

    let chars = name.chars().count();
    if chars > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds MySQL limit of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH, chars, name
        )));
    }

    Ok(())
}

fn needs_quoting(name: &str) -> bool {
    let plain = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    let leading_digit = name.starts_with(|c: char| c.is_ascii_digit());
    !plain || leading_digit || is_reserved(name)
}

fn quote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Undo [`quote`] when `s` is a well-formed backtick-quoted identifier.
fn unquote(s: &str) -> Option<String> {
    let inner = s.strip_prefix('`')?.strip_suffix('`')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '`' {
            if chars.next() != Some('`') {
                return None;
            }
        }
        out.push(c);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // =========================================================================
    // Folding
    // =========================================================================

    #[test]
    fn test_fold_preserves_case_by_default() {
        assert_eq!(fold("CUSTOMER", false), "CUSTOMER");
        assert_eq!(fold("MixedCase", false), "MixedCase");
    }

    #[test]
    fn test_fold_lowercase() {
        assert_eq!(fold("CUSTOMER", true), "customer");
        assert_eq!(fold("`ORDER`", true), "order");
    }

    // =========================================================================
    // Quoting decisions
    // =========================================================================

    #[test]
    fn test_plain_identifier_not_quoted() {
        assert_eq!(normalize("CUST_NO", false).unwrap(), "CUST_NO");
        assert_eq!(normalize("price$usd", false).unwrap(), "price$usd");
    }

    #[test]
    fn test_reserved_word_quoted() {
        assert_eq!(normalize("ORDER", false).unwrap(), "`ORDER`");
        assert_eq!(normalize("ORDER", true).unwrap(), "`order`");
        assert_eq!(normalize("Key", false).unwrap(), "`Key`");
    }

    #[test]
    fn test_special_characters_quoted() {
        assert_eq!(normalize("Line Items", false).unwrap(), "`Line Items`");
        assert_eq!(normalize("a`b", false).unwrap(), "`a``b`");
        assert_eq!(normalize("ÜBER", false).unwrap(), "`ÜBER`");
    }

    #[test]
    fn test_leading_digit_quoted() {
        assert_eq!(normalize("1ST_QUARTER", false).unwrap(), "`1ST_QUARTER`");
    }

    #[test]
    fn test_already_quoted_input_unwrapped() {
        assert_eq!(normalize("`CUSTOMER`", false).unwrap(), "CUSTOMER");
        assert_eq!(normalize("`a``b`", false).unwrap(), "`a``b`");
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn test_rejects_empty() {
        assert!(normalize("", false).is_err());
        assert!(normalize("``", false).is_err());
    }

    #[test]
    fn test_rejects_null_byte() {
        assert!(normalize("bad\0name", false).is_err());
    }

    #[test]
    fn test_rejects_trailing_space() {
        assert!(normalize("NAME ", false).is_err());
    }

    #[test]
    fn test_length_limit() {
        assert!(normalize(&"A".repeat(64), false).is_ok());
        assert!(normalize(&"A".repeat(65), false).is_err());
    }

    #[test]
    fn test_quote_mysql_always_quotes() {
        assert_eq!(quote_mysql("shop").unwrap(), "`shop`");
    }

    // =========================================================================
    // Properties
    // =========================================================================

    proptest! {
        #[test]
        fn normalize_is_idempotent(
            ident in "[A-Za-z0-9_$` .-]{1,40}",
            lowercase in any::<bool>(),
        ) {
            if let Ok(once) = normalize(&ident, lowercase) {
                let twice = normalize(&once, lowercase).unwrap();
                prop_assert_eq!(twice, once);
            }
        }

        #[test]
        fn reserved_words_stay_quoted(idx in 0..RESERVED_WORDS.len(), lowercase in any::<bool>()) {
            let word = RESERVED_WORDS[idx];
            let once = normalize(word, lowercase).unwrap();
            prop_assert!(once.starts_with('`'));
            prop_assert_eq!(normalize(&once, lowercase).unwrap(), once);
        }
    }
}
