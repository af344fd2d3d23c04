//! Database layer for the dialer engine
//!
//! SQLite via sqlx, one pool shared by every store. Write transactions are
//! opened with `BEGIN IMMEDIATE` so the write lock is taken up front; together
//! with SQLite's single-writer rule this serializes multi-table writes, which
//! is what the queue stores rely on for the one-open-entry-per-user guarantee.
//!
//! Every transaction path must end in an explicit COMMIT or ROLLBACK before
//! the connection goes back to the pool. Store methods follow the same shape:
//! acquire with [`DialerDatabase::begin_immediate`], run the work in a helper,
//! then commit on `Ok` and roll back on `Err`.

pub mod migration_store;
pub mod queue_store;
pub mod retry_store;
pub mod schema;
pub mod score_store;

use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use tracing::{error, info};

use crate::config::DatabaseConfig;
use crate::error::{DialerError, Result};

/// Shared handle to the dialer database
#[derive(Clone)]
pub struct DialerDatabase {
    pool: SqlitePool,
}

impl DialerDatabase {
    /// Open (creating if needed) the database described by the configuration.
    ///
    /// An empty `database_path` selects an in-memory database, which is forced
    /// to a single pooled connection so every handle sees the same data.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = if config.database_path.is_empty() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", config.database_path)
        };
        Self::connect_url(
            &url,
            config.max_connections,
            Duration::from_secs(config.busy_timeout_secs),
        )
        .await
    }

    /// Open a database by URL
    pub async fn connect_url(
        database_url: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self> {
        info!("🗄️ Opening dialer database at {}", database_url);

        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DialerError::config(format!("invalid database url '{database_url}': {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .connect_with(options)
            .await?;

        let db = Self { pool };
        schema::create_all(&db.pool).await?;
        info!("✅ Dialer database ready");
        Ok(db)
    }

    /// Open a fresh in-memory database (tests and tools)
    pub async fn new_in_memory() -> Result<Self> {
        Self::connect_url("sqlite::memory:", 1, Duration::from_secs(5)).await
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a connection and start an immediate-mode write transaction.
    ///
    /// The caller owns the transaction and must finish it with
    /// [`DialerDatabase::commit`] or [`DialerDatabase::rollback`] on every
    /// path before the connection drops.
    pub(crate) async fn begin_immediate(&self) -> Result<PoolConnection<Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    /// Commit a transaction started with [`DialerDatabase::begin_immediate`]
    pub(crate) async fn commit(conn: &mut PoolConnection<Sqlite>) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut **conn).await?;
        Ok(())
    }

    /// Roll back a transaction started with [`DialerDatabase::begin_immediate`]
    pub(crate) async fn rollback(conn: &mut PoolConnection<Sqlite>) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut **conn).await {
            error!("Failed to roll back transaction: {}", e);
        }
    }

    /// Verify the database answers queries
    pub async fn health_check(&self) -> Result<bool> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
