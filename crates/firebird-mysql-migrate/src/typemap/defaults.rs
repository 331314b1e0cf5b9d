//! Translation of Firebird column defaults into MySQL DEFAULT clauses.

use rust_decimal::Decimal;

use crate::config::DefaultValuePolicy;
use crate::core::traits::TargetKind;

/// Outcome of translating one column default.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranslatedDefault {
    /// Expression to put after `DEFAULT`, if any.
    pub clause: Option<String>,
    /// Set when a source default was dropped.
    pub warning: Option<String>,
}

impl TranslatedDefault {
    fn keep(clause: impl Into<String>) -> Self {
        Self {
            clause: Some(clause.into()),
            warning: None,
        }
    }
}

/// Translate a Firebird default (`0`, `'abc'`, `'NOW'`, `CURRENT_TIMESTAMP`, ...)
/// for a column of the given target kind.
///
/// A leading `DEFAULT` keyword is accepted. `Err` carries the reason when the
/// policy is [`DefaultValuePolicy::Fail`] and the default has no equivalent.
pub fn translate_default(
    source: &str,
    kind: TargetKind,
    policy: DefaultValuePolicy,
) -> std::result::Result<TranslatedDefault, String> {
    if policy == DefaultValuePolicy::Drop {
        return Ok(TranslatedDefault::default());
    }

    let expr = strip_default_keyword(source.trim());
    match translate(expr, kind) {
        Some(clause) => Ok(TranslatedDefault::keep(clause)),
        None => {
            let reason = format!("default {} has no MySQL equivalent for this column", expr);
            match policy {
                DefaultValuePolicy::Fail => Err(reason),
                _ => Ok(TranslatedDefault {
                    clause: None,
                    warning: Some(reason),
                }),
            }
        }
    }
}

fn strip_default_keyword(s: &str) -> &str {
    match s.get(..7) {
        Some(head) if head.eq_ignore_ascii_case("DEFAULT") => s[7..].trim_start(),
        _ => s,
    }
}

fn translate(expr: &str, kind: TargetKind) -> Option<String> {
    let upper = expr.to_uppercase();

    if upper == "NULL" {
        return Some("NULL".to_string());
    }

    match upper.as_str() {
        "CURRENT_TIMESTAMP" | "LOCALTIMESTAMP" | "'NOW'" => return now(kind),
        "CURRENT_DATE" | "'TODAY'" => return today(kind, 0),
        "'TOMORROW'" => return today(kind, 1),
        "'YESTERDAY'" => return today(kind, -1),
        "CURRENT_TIME" | "LOCALTIME" => {
            return (kind == TargetKind::Time).then(|| "(CURRENT_TIME(4))".to_string())
        }
        "TRUE" => return boolean(kind, true),
        "FALSE" => return boolean(kind, false),
        _ => {}
    }

    if let Some(text) = parse_string_literal(expr) {
        return string_default(&text, kind);
    }

    if expr.parse::<Decimal>().is_ok() {
        return numeric_default(expr, kind);
    }

    // USER, CURRENT_USER, CURRENT_ROLE, GEN_ID(...), arbitrary expressions
    None
}

fn now(kind: TargetKind) -> Option<String> {
    match kind {
        TargetKind::DateTime => Some("CURRENT_TIMESTAMP(4)".to_string()),
        TargetKind::Date => Some("(CURRENT_DATE)".to_string()),
        TargetKind::Time => Some("(CURRENT_TIME(4))".to_string()),
        _ => None,
    }
}

fn today(kind: TargetKind, offset_days: i32) -> Option<String> {
    let expr = match offset_days {
        0 => "CURRENT_DATE".to_string(),
        n if n > 0 => format!("CURRENT_DATE + INTERVAL {} DAY", n),
        n => format!("CURRENT_DATE - INTERVAL {} DAY", -n),
    };
    match kind {
        TargetKind::Date | TargetKind::DateTime => Some(format!("({})", expr)),
        _ => None,
    }
}

fn boolean(kind: TargetKind, value: bool) -> Option<String> {
    match kind {
        TargetKind::Bool | TargetKind::SmallInt | TargetKind::Int | TargetKind::BigInt => {
            Some(if value { "1" } else { "0" }.to_string())
        }
        _ => None,
    }
}

fn numeric_default(literal: &str, kind: TargetKind) -> Option<String> {
    match kind {
        TargetKind::SmallInt
        | TargetKind::Int
        | TargetKind::BigInt
        | TargetKind::Decimal { .. }
        | TargetKind::Float
        | TargetKind::Double => Some(literal.to_string()),
        TargetKind::Bool => match literal {
            "0" | "1" => Some(literal.to_string()),
            _ => None,
        },
        TargetKind::Char { .. } | TargetKind::Varchar { .. } => Some(mysql_string(literal)),
        TargetKind::Text => Some(format!("({})", mysql_string(literal))),
        _ => None,
    }
}

fn string_default(text: &str, kind: TargetKind) -> Option<String> {
    match kind {
        TargetKind::Char { .. } | TargetKind::Varchar { .. } => Some(mysql_string(text)),
        // TEXT columns only accept expression defaults (MySQL 8.0.13+)
        TargetKind::Text => Some(format!("({})", mysql_string(text))),
        TargetKind::Date | TargetKind::Time | TargetKind::DateTime => {
            // Firebird accepts date literals such as '2000-01-01' as defaults
            Some(mysql_string(text))
        }
        TargetKind::SmallInt
        | TargetKind::Int
        | TargetKind::BigInt
        | TargetKind::Decimal { .. }
        | TargetKind::Float
        | TargetKind::Double => text.trim().parse::<Decimal>().ok().map(|d| d.to_string()),
        _ => None,
    }
}

/// Parse a Firebird `'...'` literal, undoubling embedded quotes.
fn parse_string_literal(expr: &str) -> Option<String> {
    let inner = expr.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() != Some(&'\'') {
                return None;
            }
            chars.next();
        }
        out.push(c);
    }
    Some(out)
}

/// Render a MySQL string literal (default `sql_mode` treats backslash as escape).
fn mysql_string(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(source: &str, kind: TargetKind) -> TranslatedDefault {
        translate_default(source, kind, DefaultValuePolicy::Approximate).unwrap()
    }

    #[test]
    fn test_numeric_literals() {
        assert_eq!(approx("DEFAULT 0", TargetKind::Int).clause.as_deref(), Some("0"));
        assert_eq!(
            approx("default -1.50", TargetKind::Decimal { precision: 9, scale: 2 })
                .clause
                .as_deref(),
            Some("-1.50")
        );
    }

    #[test]
    fn test_string_literals() {
        let kind = TargetKind::Varchar { length: 20 };
        assert_eq!(approx("'N/A'", kind).clause.as_deref(), Some("'N/A'"));
        assert_eq!(approx("'O''Brien'", kind).clause.as_deref(), Some("'O''Brien'"));
        assert_eq!(approx("'C:\\tmp'", kind).clause.as_deref(), Some("'C:\\\\tmp'"));
        assert_eq!(approx("'x'", TargetKind::Text).clause.as_deref(), Some("('x')"));
    }

    #[test]
    fn test_null_default() {
        assert_eq!(approx("DEFAULT NULL", TargetKind::Int).clause.as_deref(), Some("NULL"));
    }

    #[test]
    fn test_timestamp_functions() {
        assert_eq!(
            approx("CURRENT_TIMESTAMP", TargetKind::DateTime).clause.as_deref(),
            Some("CURRENT_TIMESTAMP(4)")
        );
        assert_eq!(
            approx("'NOW'", TargetKind::DateTime).clause.as_deref(),
            Some("CURRENT_TIMESTAMP(4)")
        );
        assert_eq!(
            approx("'TODAY'", TargetKind::Date).clause.as_deref(),
            Some("(CURRENT_DATE)")
        );
        assert_eq!(
            approx("'TOMORROW'", TargetKind::Date).clause.as_deref(),
            Some("(CURRENT_DATE + INTERVAL 1 DAY)")
        );
    }

    #[test]
    fn test_booleans() {
        assert_eq!(approx("TRUE", TargetKind::Bool).clause.as_deref(), Some("1"));
        assert_eq!(approx("FALSE", TargetKind::SmallInt).clause.as_deref(), Some("0"));
    }

    #[test]
    fn test_unknown_function_dropped_with_warning() {
        let t = approx("USER", TargetKind::Varchar { length: 31 });
        assert!(t.clause.is_none());
        assert!(t.warning.unwrap().contains("USER"));
    }

    #[test]
    fn test_fail_policy() {
        let err = translate_default(
            "CURRENT_ROLE",
            TargetKind::Varchar { length: 63 },
            DefaultValuePolicy::Fail,
        )
        .unwrap_err();
        assert!(err.contains("CURRENT_ROLE"));

        // Translatable defaults still pass under Fail
        let ok = translate_default("0", TargetKind::Int, DefaultValuePolicy::Fail).unwrap();
        assert_eq!(ok.clause.as_deref(), Some("0"));
    }

    #[test]
    fn test_drop_policy() {
        let t = translate_default("0", TargetKind::Int, DefaultValuePolicy::Drop).unwrap();
        assert_eq!(t, TranslatedDefault::default());
    }
}
