//! Store configuration, read from the process environment.

use sqlx::ConnectOptions;
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const APPLICATION_NAME_VAR: &str = "INVOICEDB_APPLICATION_NAME";
pub const STATEMENT_LOGGING_VAR: &str = "INVOICEDB_STATEMENT_LOGGING";

const DEFAULT_APPLICATION_NAME: &str = "invoicedb";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Connection settings for the Postgres invoice store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    /// Reported to the server as `application_name`.
    pub application_name: String,
    /// Log every statement at `debug` through sqlx.
    pub statement_logging: bool,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            statement_logging: false,
        }
    }

    /// Load from `DATABASE_URL`, `INVOICEDB_APPLICATION_NAME` and `INVOICEDB_STATEMENT_LOGGING`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup(DATABASE_URL_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(DATABASE_URL_VAR))?;

        let mut config = Self::new(database_url);

        if let Some(name) = lookup(APPLICATION_NAME_VAR).filter(|v| !v.trim().is_empty()) {
            config.application_name = name;
        }

        if let Some(raw) = lookup(STATEMENT_LOGGING_VAR) {
            config.statement_logging = parse_bool(STATEMENT_LOGGING_VAR, &raw)?;
        }

        Ok(config)
    }

    /// Parse the URL into sqlx connect options.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let options: PgConnectOptions =
            self.database_url
                .parse()
                .map_err(|e: sqlx::Error| ConfigError::Invalid {
                    var: DATABASE_URL_VAR,
                    reason: e.to_string(),
                })?;

        let options = options.application_name(&self.application_name);
        Ok(if self.statement_logging {
            options.log_statements(log::LevelFilter::Debug)
        } else {
            options.disable_statement_logging()
        })
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            var,
            reason: format!("expected true/false, got '{other}'"),
        }),
    }
}
