//! Connection factory.
//!
//! Every store operation asks the factory for a brand-new connection and drops
//! it before returning. Nothing here pools or reuses connections.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};

use crate::config::{ConfigError, StoreConfig};

/// Opens database connections for the Postgres invoice store.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<PgConnection, sqlx::Error>;
}

/// Factory that dials a new Postgres connection on every call.
#[derive(Debug, Clone)]
pub struct PgConnectionFactory {
    options: PgConnectOptions,
}

impl PgConnectionFactory {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.connect_options()?))
    }

    pub fn options(&self) -> &PgConnectOptions {
        &self.options
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self) -> Result<PgConnection, sqlx::Error> {
        self.options.connect().await
    }
}

/// Close a connection explicitly once an operation is done with it.
///
/// Dropping the connection releases it too; closing first sends the
/// terminate message so the server frees the backend immediately.
pub(crate) async fn release(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "connection close failed; dropped instead");
    }
}
