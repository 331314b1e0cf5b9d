//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config(
            "source.database is required (or set FIREBIRD_DATABASE)".into(),
        ));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config(
            "target.database is required (or set MYSQL_DATABASE)".into(),
        ));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.database.contains('`') || config.target.database.len() > 64 {
        return Err(MigrateError::Config(format!(
            "target.database '{}' is not a valid MySQL database name",
            config.target.database
        )));
    }

    check_charset("source.charset", &config.source.charset)?;
    check_charset("target.charset", &config.target.charset)?;

    // Migration config validation
    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if !config.migration.transfer_structure && !config.migration.transfer_data {
        return Err(MigrateError::Config(
            "structure-only and data-only cannot be combined".into(),
        ));
    }
    if config.migration.tables.iter().any(|t| t.trim().is_empty()) {
        return Err(MigrateError::Config(
            "migration.tables must not contain empty names".into(),
        ));
    }

    Ok(())
}

/// Charset names end up in the ODBC connection string and in `SET NAMES`.
fn check_charset(field: &str, charset: &str) -> Result<()> {
    if charset.is_empty()
        || !charset
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(MigrateError::Config(format!(
            "{} '{}' is not a valid character set name",
            field, charset
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                database: "/data/erp.fdb".to_string(),
                password: "masterkey".to_string(),
                ..SourceConfig::default()
            },
            target: TargetConfig {
                database: "erp".to_string(),
                password: "password".to_string(),
                ..TargetConfig::default()
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_database() {
        let mut config = valid_config();
        config.source.database = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_target_database() {
        let mut config = valid_config();
        config.target.database = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_backtick_in_database_name() {
        let mut config = valid_config();
        config.target.database = "bad`name".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_charset_must_be_a_plain_name() {
        let mut config = valid_config();
        config.target.charset = "utf8mb4; DROP DATABASE erp".to_string();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, MigrateError::Config(ref m) if m.starts_with("target.charset")));

        let mut config = valid_config();
        config.source.charset = "UTF8;UID=x".to_string();
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.target.charset = String::new();
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.source.charset = "WIN1252".to_string();
        config.target.charset = "utf8mb4".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers() {
        let mut config = valid_config();
        config.migration.workers = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_structure_only_and_data_only_conflict() {
        let mut config = valid_config();
        config.migration.transfer_structure = false;
        config.migration.transfer_data = false;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("cannot be combined"));
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "another_secret".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("another_secret"));
    }
}
