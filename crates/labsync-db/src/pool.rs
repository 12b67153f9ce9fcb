//! Connection pool wrapper.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use crate::error::DbError;

/// Default upper bound on pooled connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Shared `PostgreSQL` connection pool.
#[derive(Debug, Clone)]
pub struct DbPool {
    inner: PgPool,
}

impl DbPool {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns `DbError::ConnectionFailed` if the database cannot be reached.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        Self::connect_with(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Connect with an explicit connection cap.
    ///
    /// # Errors
    ///
    /// Returns `DbError::ConnectionFailed` if the database cannot be reached.
    pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self, DbError> {
        let inner = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(DbError::ConnectionFailed)?;

        tracing::debug!(max_connections, "Database pool connected");
        Ok(Self { inner })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(inner: PgPool) -> Self {
        Self { inner }
    }

    /// Borrow the underlying `SQLx` pool.
    #[must_use]
    pub fn inner(&self) -> &PgPool {
        &self.inner
    }

    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// Returns `DbError::ConnectionFailed` if no connection can be acquired.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, DbError> {
        self.inner.begin().await.map_err(DbError::ConnectionFailed)
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Number of open connections.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.inner.size()
    }
}

impl AsRef<PgPool> for DbPool {
    fn as_ref(&self) -> &PgPool {
        &self.inner
    }
}
