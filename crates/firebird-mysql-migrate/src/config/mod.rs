//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Config file used when none is named explicitly.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration the way the CLI does: file (or defaults when the
    /// default path is absent), then process environment overrides, then validation.
    pub fn resolve<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Config = if path.exists() {
            info!("Loading configuration from {:?}", path);
            serde_yaml::from_str(&std::fs::read_to_string(path)?)?
        } else if path == Path::new(DEFAULT_CONFIG_PATH) {
            debug!("{} not found, using defaults and environment", DEFAULT_CONFIG_PATH);
            Config::default()
        } else {
            return Err(MigrateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override connection settings from `FIREBIRD_*` / `MYSQL_*` variables.
    ///
    /// The lookup is injected so tests never touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let port = |key: &str, value: String| -> Result<u16> {
            value
                .parse()
                .map_err(|_| MigrateError::Config(format!("{} must be a port number, got '{}'", key, value)))
        };

        if let Some(v) = get("FIREBIRD_HOST") {
            self.source.host = v;
        }
        if let Some(v) = get("FIREBIRD_PORT") {
            self.source.port = port("FIREBIRD_PORT", v)?;
        }
        if let Some(v) = get("FIREBIRD_DATABASE") {
            self.source.database = v;
        }
        if let Some(v) = get("FIREBIRD_USER") {
            self.source.user = v;
        }
        if let Some(v) = get("FIREBIRD_PASSWORD") {
            self.source.password = v;
        }
        if let Some(v) = get("FIREBIRD_CHARSET") {
            self.source.charset = v;
        }

        if let Some(v) = get("MYSQL_HOST") {
            self.target.host = v;
        }
        if let Some(v) = get("MYSQL_PORT") {
            self.target.port = port("MYSQL_PORT", v)?;
        }
        if let Some(v) = get("MYSQL_DATABASE") {
            self.target.database = v;
        }
        if let Some(v) = get("MYSQL_USER") {
            self.target.user = v;
        }
        if let Some(v) = get("MYSQL_PASSWORD") {
            self.target.password = v;
        }
        if let Some(v) = get("MYSQL_CHARSET") {
            self.target.charset = v;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl SourceConfig {
    /// Build an ODBC connection string for the Firebird driver.
    pub fn connection_string(&self) -> String {
        format!(
            "Driver={{{}}};Dbname={}/{}:{};Uid={};Pwd={};Charset={};",
            self.odbc_driver, self.host, self.port, self.database, self.user, self.password, self.charset
        )
    }
}
