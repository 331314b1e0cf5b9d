//! Value coercion from source values to the representation each target
//! column kind expects.
//!
//! The ODBC reader hands over text for everything but binary columns, so
//! most of the work here is strict parsing. Anything that would change a
//! value (overflow, extra digits, over-long strings) is an error for that
//! row, never a silent truncation.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::core::traits::TargetKind;
use crate::core::value::{Row, SqlValue};

type Conversion<T> = std::result::Result<T, String>;

/// Converts whole rows for one table.
#[derive(Debug, Clone)]
pub struct RowConverter {
    kinds: Vec<TargetKind>,
    names: Vec<String>,
    trim_char_padding: bool,
}

impl RowConverter {
    pub fn new(kinds: Vec<TargetKind>, names: Vec<String>, trim_char_padding: bool) -> Self {
        Self {
            kinds,
            names,
            trim_char_padding,
        }
    }

    /// Convert one row. The error names the offending column.
    pub fn convert(&self, row: Row) -> Conversion<Row> {
        if row.len() != self.kinds.len() {
            return Err(format!(
                "row has {} values, expected {}",
                row.len(),
                self.kinds.len()
            ));
        }

        row.into_iter()
            .zip(&self.kinds)
            .zip(&self.names)
            .map(|((value, kind), name)| {
                convert_value(value, *kind, self.trim_char_padding)
                    .map_err(|reason| format!("column {}: {}", name, reason))
            })
            .collect()
    }
}

/// Convert one value for a column of `kind`.
pub fn convert_value(
    value: SqlValue<'static>,
    kind: TargetKind,
    trim_char_padding: bool,
) -> Conversion<SqlValue<'static>> {
    if value.is_null() {
        return Ok(SqlValue::Null(kind.null_type()));
    }

    match kind {
        TargetKind::SmallInt => {
            let v = to_i64(&value)?;
            i16::try_from(v)
                .map(SqlValue::I16)
                .map_err(|_| format!("{} is out of range for SMALLINT", v))
        }
        TargetKind::Int => {
            let v = to_i64(&value)?;
            i32::try_from(v)
                .map(SqlValue::I32)
                .map_err(|_| format!("{} is out of range for INT", v))
        }
        TargetKind::BigInt => to_i64(&value).map(SqlValue::I64),
        TargetKind::Decimal { precision, scale } => to_decimal(value, precision, scale),
        TargetKind::Float => {
            let v = to_f64(&value)?;
            if v.abs() > f32::MAX as f64 {
                return Err(format!("{} is out of range for FLOAT", v));
            }
            Ok(SqlValue::F32(v as f32))
        }
        TargetKind::Double => to_f64(&value).map(SqlValue::F64),
        TargetKind::Bool => to_bool(&value).map(SqlValue::Bool),
        TargetKind::Char { length } => {
            let mut text = to_text(value)?;
            if trim_char_padding {
                let trimmed = text.trim_end_matches(' ').len();
                text.truncate(trimmed);
            }
            check_chars(&text, length)?;
            Ok(SqlValue::Text(Cow::Owned(text)))
        }
        TargetKind::Varchar { length } => {
            let text = to_text(value)?;
            check_chars(&text, length)?;
            Ok(SqlValue::Text(Cow::Owned(text)))
        }
        TargetKind::Text => Ok(SqlValue::Text(Cow::Owned(to_text(value)?))),
        TargetKind::Binary { length } | TargetKind::Varbinary { length } => {
            let bytes = to_bytes(value)?;
            if bytes.len() > length as usize {
                return Err(format!(
                    "{} bytes exceed column length {}",
                    bytes.len(),
                    length
                ));
            }
            Ok(SqlValue::Bytes(Cow::Owned(bytes)))
        }
        TargetKind::Blob => Ok(SqlValue::Bytes(Cow::Owned(to_bytes(value)?))),
        TargetKind::Date => to_date(&value).map(SqlValue::Date),
        TargetKind::Time => to_time(&value).map(SqlValue::Time),
        TargetKind::DateTime => to_datetime(&value).map(SqlValue::DateTime),
    }
}

fn unexpected(value: &SqlValue<'_>, target: &str) -> String {
    format!("cannot convert {} to {}", value.kind_name(), target)
}

fn to_i64(value: &SqlValue<'_>) -> Conversion<i64> {
    match value {
        SqlValue::Bool(b) => Ok(i64::from(*b)),
        SqlValue::I16(v) => Ok(i64::from(*v)),
        SqlValue::I32(v) => Ok(i64::from(*v)),
        SqlValue::I64(v) => Ok(*v),
        SqlValue::Decimal(d) => integral_decimal(*d),
        SqlValue::Text(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(v) => Ok(v),
                // Dialect-1 and driver formatting can render integers as "42.0000"
                Err(_) => s
                    .parse::<Decimal>()
                    .map_err(|_| format!("'{}' is not an integer", s))
                    .and_then(integral_decimal),
            }
        }
        other => Err(unexpected(other, "integer")),
    }
}

fn integral_decimal(d: Decimal) -> Conversion<i64> {
    if !d.fract().is_zero() {
        return Err(format!("{} has a fractional part", d));
    }
    d.to_i64().ok_or_else(|| format!("{} is out of range for BIGINT", d))
}

fn to_f64(value: &SqlValue<'_>) -> Conversion<f64> {
    let v = match value {
        SqlValue::F32(v) => f64::from(*v),
        SqlValue::F64(v) => *v,
        SqlValue::I16(v) => f64::from(*v),
        SqlValue::I32(v) => f64::from(*v),
        SqlValue::I64(v) => *v as f64,
        SqlValue::Decimal(d) => d
            .to_f64()
            .ok_or_else(|| format!("{} is out of range for DOUBLE", d))?,
        SqlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", s.trim()))?,
        other => return Err(unexpected(other, "floating point")),
    };
    if !v.is_finite() {
        return Err(format!("{} cannot be stored in MySQL", v));
    }
    Ok(v)
}

fn to_decimal(value: SqlValue<'static>, precision: u32, scale: u32) -> Conversion<SqlValue<'static>> {
    let text = match &value {
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::I16(v) => v.to_string(),
        SqlValue::I32(v) => v.to_string(),
        SqlValue::I64(v) => v.to_string(),
        SqlValue::F32(_) | SqlValue::F64(_) => {
            let f = to_f64(&value)?;
            Decimal::from_f64(f)
                .ok_or_else(|| format!("{} is out of range for DECIMAL", f))?
                .normalize()
                .to_string()
        }
        SqlValue::Text(s) => s.trim().to_string(),
        other => return Err(unexpected(other, "DECIMAL")),
    };

    let canonical = rescale_decimal_text(&text, precision, scale)?;
    // Values past rust_decimal's 28 exact digits (INT128, wide scales) travel as text
    let digits = canonical.bytes().filter(u8::is_ascii_digit).count();
    Ok(match canonical.parse::<Decimal>() {
        Ok(d) if digits <= 28 => SqlValue::Decimal(d),
        _ => SqlValue::Text(Cow::Owned(canonical)),
    })
}

/// Validate a plain decimal literal against DECIMAL(precision, scale) and
/// render it with exactly `scale` fractional digits.
pub(crate) fn rescale_decimal_text(text: &str, precision: u32, scale: u32) -> Conversion<String> {
    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));

    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !digits(int_part) || !digits(frac_part) {
        return Err(format!("'{}' is not a decimal number", text));
    }

    let int_part = int_part.trim_start_matches('0');
    let significant_frac = frac_part.trim_end_matches('0');

    if significant_frac.len() > scale as usize {
        return Err(format!("{} has more than {} decimal places", text, scale));
    }
    let max_int_digits = precision.saturating_sub(scale) as usize;
    if int_part.len() > max_int_digits {
        return Err(format!(
            "{} is out of range for DECIMAL({},{})",
            text, precision, scale
        ));
    }

    let mut out = String::with_capacity(int_part.len() + scale as usize + 2);
    let is_zero = int_part.is_empty() && significant_frac.is_empty();
    if negative && !is_zero {
        out.push('-');
    }
    out.push_str(if int_part.is_empty() { "0" } else { int_part });
    if scale > 0 {
        out.push('.');
        out.push_str(significant_frac);
        for _ in significant_frac.len()..scale as usize {
            out.push('0');
        }
    }
    Ok(out)
}

fn to_bool(value: &SqlValue<'_>) -> Conversion<bool> {
    match value {
        SqlValue::Bool(b) => Ok(*b),
        SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_) | SqlValue::Decimal(_) => {
            match to_i64(value)? {
                0 => Ok(false),
                1 => Ok(true),
                v => Err(format!("{} is not a boolean", v)),
            }
        }
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "y" => Ok(true),
            "0" | "false" | "f" | "n" => Ok(false),
            other => Err(format!("'{}' is not a boolean", other)),
        },
        other => Err(unexpected(other, "boolean")),
    }
}

fn to_text(value: SqlValue<'static>) -> Conversion<String> {
    Ok(match value {
        SqlValue::Text(s) => s.into_owned(),
        SqlValue::Bytes(b) => String::from_utf8(b.into_owned())
            .map_err(|e| format!("invalid UTF-8 at byte {}", e.utf8_error().valid_up_to()))?,
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::I16(v) => v.to_string(),
        SqlValue::I32(v) => v.to_string(),
        SqlValue::I64(v) => v.to_string(),
        SqlValue::F32(v) => v.to_string(),
        SqlValue::F64(v) => v.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::DateTimeOffset(v) => v.to_rfc3339(),
        SqlValue::Date(v) => v.format("%Y-%m-%d").to_string(),
        SqlValue::Time(v) => v.format("%H:%M:%S%.f").to_string(),
        SqlValue::Null(_) => String::new(),
    })
}

fn to_bytes(value: SqlValue<'static>) -> Conversion<Vec<u8>> {
    match value {
        SqlValue::Bytes(b) => Ok(b.into_owned()),
        SqlValue::Text(s) => Ok(s.into_owned().into_bytes()),
        other => Err(unexpected(&other, "binary")),
    }
}

fn check_chars(text: &str, length: u32) -> Conversion<()> {
    let chars = text.chars().count();
    if chars > length as usize {
        return Err(format!(
            "{} characters exceed column length {}",
            chars, length
        ));
    }
    Ok(())
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
const DATETIME_TZ_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f %:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%:z"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

fn to_datetime(value: &SqlValue<'_>) -> Conversion<NaiveDateTime> {
    match value {
        SqlValue::DateTime(v) => Ok(*v),
        SqlValue::DateTimeOffset(v) => Ok(v.naive_utc()),
        SqlValue::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
        SqlValue::Text(s) => {
            let s = s.trim();
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .or_else(|| {
                    DATETIME_TZ_FORMATS
                        .iter()
                        .find_map(|f| DateTime::parse_from_str(s, f).ok())
                        .map(|dt| dt.naive_utc())
                })
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .map(|d| d.and_time(NaiveTime::MIN))
                })
                .ok_or_else(|| format!("'{}' is not a timestamp", s))
        }
        other => Err(unexpected(other, "DATETIME")),
    }
}

fn to_date(value: &SqlValue<'_>) -> Conversion<NaiveDate> {
    match value {
        SqlValue::Date(d) => Ok(*d),
        SqlValue::DateTime(v) => Ok(v.date()),
        SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| format!("'{}' is not a date", s.trim())),
        other => Err(unexpected(other, "DATE")),
    }
}

fn to_time(value: &SqlValue<'_>) -> Conversion<NaiveTime> {
    match value {
        SqlValue::Time(t) => Ok(*t),
        SqlValue::DateTime(v) => Ok(v.time()),
        SqlValue::DateTimeOffset(v) => Ok(v.naive_utc().time()),
        SqlValue::Text(s) => {
            let s = s.trim();
            if let Some(t) = TIME_FORMATS
                .iter()
                .find_map(|f| NaiveTime::parse_from_str(s, f).ok())
            {
                return Ok(t);
            }
            // TIME WITH TIME ZONE: "10:00:00.0000 +02:00"
            let (clock, offset) = s
                .rsplit_once(' ')
                .ok_or_else(|| format!("'{}' is not a time", s))?;
            let anchor = format!("2000-01-01 {} {}", clock, offset);
            DateTime::parse_from_str(&anchor, "%Y-%m-%d %H:%M:%S%.f %:z")
                .map(|dt| dt.naive_utc().time())
                .map_err(|_| format!("'{}' is not a time", s))
        }
        other => Err(unexpected(other, "TIME")),
    }
}
