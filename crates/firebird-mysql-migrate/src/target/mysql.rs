//! MySQL target writer.
//!
//! Uses mysql_async for connection pooling and multi-row INSERT for data.
//! Each [`MysqlSession`] owns one pooled connection for its whole life, so
//! explicit `START TRANSACTION` / `COMMIT` statements stay on one server
//! session.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::identifier::quote_mysql;
use crate::core::traits::{InsertTarget, TargetSession, TargetWriter};
use crate::core::value::{Row, SqlValue};
use crate::ddl::DdlStatement;
use crate::error::{MigrateError, Result};

/// MySQL max placeholders per prepared statement.
const MYSQL_MAX_PLACEHOLDERS: usize = 65535;

/// Oldest server that accepts the expression defaults the DDL emits.
const MIN_SERVER_VERSION: (u16, u16, u16) = (8, 0, 13);

/// MySQL target writer using mysql_async.
pub struct MysqlWriter {
    pool: Pool,
    database: String,
}

impl MysqlWriter {
    /// Connect to the target, creating the database first when configured.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let ssl_opts = ssl_opts_for(&config.ssl_mode);

        let base = || {
            let mut builder = OptsBuilder::default()
                .ip_or_hostname(config.host.clone())
                .tcp_port(config.port)
                .user(Some(config.user.clone()))
                .pass(Some(config.password.clone()))
                // Full Unicode on every pooled connection
                .init(vec![format!("SET NAMES {}", config.charset)]);
            if let Some(ssl) = ssl_opts.clone() {
                builder = builder.ssl_opts(ssl);
            }
            builder
        };

        if config.create_database {
            let mut conn = Conn::new(Opts::from(base()))
                .await
                .map_err(|e| connectivity(e, "connecting to MySQL server"))?;
            let sql = format!(
                "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
                quote_mysql(&config.database)?
            );
            conn.query_drop(&sql)
                .await
                .map_err(|e| classify(e, |m| MigrateError::ddl(&config.database, m)))?;
            conn.disconnect().await.ok();
            debug!("Ensured database '{}' exists", config.database);
        }

        let constraints = PoolConstraints::new(1, max_conns.max(1)).ok_or_else(|| {
            MigrateError::Config(format!("invalid MySQL pool size {}", max_conns))
        })?;
        let pool_opts = PoolOpts::new().with_constraints(constraints);

        let opts: Opts = base()
            .db_name(Some(config.database.clone()))
            .pool_opts(pool_opts)
            .into();
        let pool = Pool::new(opts);

        // Test connection
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| connectivity(e, "creating MySQL target pool"))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| connectivity(e, "testing MySQL target connection"))?;
        check_server_version(conn.server_version())?;
        drop(conn);

        info!(
            "Connected to MySQL target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| connectivity(e, "getting MySQL connection"))
    }
}

#[async_trait]
impl TargetWriter for MysqlWriter {
    async fn open_session(&self) -> Result<Box<dyn TargetSession>> {
        let conn = self.conn().await?;
        Ok(Box::new(MysqlSession {
            conn,
            in_transaction: false,
        }))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut conn = self.conn().await?;

        let sql = r#"
            SELECT COUNT(*) as cnt FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        "#;

        let count: Option<i64> = conn
            .exec_first(sql, (self.database.as_str(), table))
            .await
            .map_err(|e| connectivity(e, "checking table existence"))?;

        Ok(count.unwrap_or(0) > 0)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        let sql = format!("SELECT COUNT(*) as cnt FROM {}", quote_mysql(table)?);
        let count: Option<i64> = conn
            .query_first(&sql)
            .await
            .map_err(|e| classify(e, |m| MigrateError::transfer(table, m)))?;
        Ok(count.unwrap_or(0))
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.clone().disconnect().await.ok();
    }
}

/// One dedicated MySQL connection.
pub struct MysqlSession {
    conn: Conn,
    in_transaction: bool,
}

#[async_trait]
impl TargetSession for MysqlSession {
    async fn execute(&mut self, stmt: &DdlStatement) -> Result<()> {
        let table = stmt.table.clone().unwrap_or_default();
        self.conn
            .query_drop(&stmt.sql)
            .await
            .map_err(|e| classify(e, |m| MigrateError::ddl(table, m)))?;
        debug!("Executed {:?} statement for {}", stmt.phase, stmt.table.as_deref().unwrap_or("-"));
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        self.conn
            .query_drop("START TRANSACTION")
            .await
            .map_err(|e| connectivity(e, "starting transaction"))?;
        self.in_transaction = true;
        Ok(())
    }

    async fn insert_rows(&mut self, target: &InsertTarget, rows: &[Row]) -> Result<u64> {
        let num_cols = target.quoted_columns.len();
        if rows.is_empty() || num_cols == 0 {
            return Ok(0);
        }

        for chunk in rows.chunks(rows_per_statement(num_cols)) {
            let sql = insert_sql(target, chunk.len());

            // Collect all values for binding
            let params: Vec<mysql_async::Value> = chunk
                .iter()
                .flat_map(|row| row.iter().map(sql_value_to_mysql))
                .collect();

            self.conn
                .exec_drop(&sql, params)
                .await
                .map_err(|e| classify(e, MigrateError::RowInsert))?;
        }

        debug!("MySQL: wrote {} rows to {}", rows.len(), target.table);
        Ok(rows.len() as u64)
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn
            .query_drop("COMMIT")
            .await
            .map_err(|e| classify(e, MigrateError::RowInsert))?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.conn
            .query_drop("ROLLBACK")
            .await
            .map_err(|e| connectivity(e, "rolling back"))
    }
}

fn ssl_opts_for(ssl_mode: &str) -> Option<SslOpts> {
    match ssl_mode.to_lowercase().as_str() {
        "disable" | "disabled" => {
            warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
            None
        }
        "prefer" | "preferred" | "require" | "required" => {
            Some(SslOpts::default().with_danger_accept_invalid_certs(true))
        }
        "verify-ca" | "verify_ca" | "verify-full" | "verify_identity" => Some(SslOpts::default()),
        _ => {
            warn!("Unknown ssl_mode '{}', defaulting to Preferred", ssl_mode);
            Some(SslOpts::default().with_danger_accept_invalid_certs(true))
        }
    }
}

/// Rows per INSERT statement for a given column count.
fn rows_per_statement(num_cols: usize) -> usize {
    (MYSQL_MAX_PLACEHOLDERS / num_cols.max(1)).max(1)
}

/// Multi-row INSERT with `row_count` placeholder groups.
fn insert_sql(target: &InsertTarget, row_count: usize) -> String {
    let placeholders_per_row = format!("({})", vec!["?"; target.quoted_columns.len()].join(", "));
    let all_placeholders = vec![placeholders_per_row; row_count];

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        target.quoted_table,
        target.quoted_columns.join(", "),
        all_placeholders.join(", ")
    )
}

/// Server errors belong to the statement; everything else means the
/// connection is gone.
fn classify(err: mysql_async::Error, on_server: impl FnOnce(String) -> MigrateError) -> MigrateError {
    match err {
        mysql_async::Error::Server(e) => on_server(format!("{} (error {})", e.message, e.code)),
        other => MigrateError::Connectivity(format!("MySQL: {}", other)),
    }
}

fn connectivity(err: mysql_async::Error, context: &str) -> MigrateError {
    MigrateError::Connectivity(format!("{}: {}", context, err))
}

/// Convert SqlValue to mysql_async::Value.
fn sql_value_to_mysql(value: &SqlValue<'_>) -> mysql_async::Value {
    use chrono::{Datelike, Timelike};
    use mysql_async::Value;

    match value {
        SqlValue::Null(_) => Value::NULL,
        SqlValue::Bool(b) => Value::from(*b),
        SqlValue::I16(i) => Value::from(*i),
        SqlValue::I32(i) => Value::from(*i),
        SqlValue::I64(i) => Value::from(*i),
        SqlValue::F32(f) => Value::Float(*f),
        SqlValue::F64(f) => Value::Double(*f),
        SqlValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
        SqlValue::Bytes(b) => Value::Bytes(b.to_vec()),
        SqlValue::Decimal(d) => Value::Bytes(d.to_string().into_bytes()),
        SqlValue::DateTime(dt) => datetime_value(*dt),
        SqlValue::DateTimeOffset(dto) => datetime_value(dto.naive_utc()),
        SqlValue::Date(d) => Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        SqlValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond().min(999_999_999) / 1000,
        ),
    }
}

fn datetime_value(dt: chrono::NaiveDateTime) -> mysql_async::Value {
    use chrono::{Datelike, Timelike};

    mysql_async::Value::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        dt.nanosecond().min(999_999_999) / 1000,
    )
}

/// Reject servers older than `MIN_SERVER_VERSION`. A version the driver
/// could not parse is reported as 0.0.0 and let through with a warning.
fn check_server_version(version: (u16, u16, u16)) -> Result<()> {
    let (major, minor, patch) = version;
    if version == (0, 0, 0) {
        warn!("Could not determine MySQL server version; assuming 8.0.13 or later");
        return Ok(());
    }
    if version < MIN_SERVER_VERSION {
        let (min_major, min_minor, min_patch) = MIN_SERVER_VERSION;
        return Err(MigrateError::Config(format!(
            "MySQL server {}.{}.{} is too old; {}.{}.{} or later is required",
            major, minor, patch, min_major, min_minor, min_patch
        )));
    }
    debug!("MySQL server version {}.{}.{}", major, minor, patch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use mysql_async::Value;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn target(cols: usize) -> InsertTarget {
        InsertTarget {
            table: "sales".into(),
            quoted_table: "sales".into(),
            quoted_columns: (0..cols).map(|i| format!("c{}", i)).collect(),
        }
    }

    #[test]
    fn test_server_version_floor() {
        let err = check_server_version((5, 7, 44)).unwrap_err();
        assert!(matches!(err, MigrateError::Config(ref m) if m.contains("5.7.44 is too old")));
        assert!(check_server_version((8, 0, 12)).is_err());
        assert!(check_server_version((8, 0, 13)).is_ok());
        assert!(check_server_version((8, 4, 0)).is_ok());
        // MariaDB reports its own version line
        assert!(check_server_version((10, 6, 12)).is_ok());
        assert!(check_server_version((0, 0, 0)).is_ok());
    }

    #[test]
    fn test_insert_sql() {
        assert_eq!(
            insert_sql(&target(2), 2),
            "INSERT INTO sales (c0, c1) VALUES (?, ?), (?, ?)"
        );
    }

    #[test]
    fn test_rows_per_statement_respects_placeholder_limit() {
        assert_eq!(rows_per_statement(1), 65535);
        assert_eq!(rows_per_statement(10), 6553);
        assert!(rows_per_statement(70000) >= 1);
    }

    #[test]
    fn test_decimal_sent_as_text() {
        let d = Decimal::from_str("12345.6700").unwrap();
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Decimal(d)),
            Value::Bytes(b"12345.6700".to_vec())
        );
    }

    #[test]
    fn test_temporal_values() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(13, 45, 7, 123_400)
            .unwrap();
        assert_eq!(
            sql_value_to_mysql(&SqlValue::DateTime(dt)),
            Value::Date(2024, 2, 29, 13, 45, 7, 123_400)
        );

        let t = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Time(t)),
            Value::Time(false, 0, 23, 59, 59, 0)
        );
    }

    #[test]
    fn test_ssl_modes() {
        assert!(ssl_opts_for("disable").is_none());
        assert!(ssl_opts_for("require").is_some());
        assert!(ssl_opts_for("VERIFY-FULL").is_some());
    }
}
