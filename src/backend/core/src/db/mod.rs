//! Database layer for Warden.
//!
//! Uses PostgreSQL for persistent storage with sqlx. Every engine operation
//! runs inside one database transaction opened by [`Database::begin`].

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::store::{Store, Transaction, TransactionMode};

mod rows;
mod transaction;

pub use transaction::PgTransaction;

/// Database connection pool and [`Store`] implementation.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connected to policy store"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Policy schema migrations applied");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    async fn begin(&self, mode: TransactionMode) -> Result<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await?;
        if mode == TransactionMode::ReadOnly {
            sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        }
        debug!(?mode, "Database transaction started");
        Ok(Box::new(PgTransaction::new(tx, mode)))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
