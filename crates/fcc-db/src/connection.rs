//! Database connection management.
//!
//! Provides a `ConnectionPool` wrapper around `SQLx` that opens the `SQLite`
//! file with the pragmas every worker relies on: WAL journaling so readers do
//! not block the queue, a busy timeout so racing claims wait instead of
//! erroring, and enforced foreign keys for the cascading job tree.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// `SQLite` connection pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: Pool<Sqlite>,
}

impl ConnectionPool {
    /// Open (creating if missing) the database at `path`.
    ///
    /// # Arguments
    /// * `path` - Path to the `SQLite` database file (or `:memory:` for in-memory)
    /// * `max_connections` - Upper bound on pooled connections
    ///
    /// # Errors
    /// Returns `DatabaseError::Open` if the path is not valid UTF-8 or the
    /// database cannot be opened.
    pub async fn new(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path_str = path.as_ref().to_str().ok_or_else(|| {
            DatabaseError::Open("invalid database path: not valid UTF-8".to_string())
        })?;

        let connect_options = SqliteConnectOptions::from_str(path_str)
            .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(connect_options)
            .await
            .map_err(|e| DatabaseError::Open(format!("failed to initialize pool: {e}")))?;

        tracing::info!("Database pool created at {}", path_str);

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying `SQLx` pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run a trivial query to confirm the database answers.
    ///
    /// # Errors
    /// Returns `DatabaseError::Sqlx` if the query fails.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_creation() {
        let pool = ConnectionPool::new(":memory:", DEFAULT_MAX_CONNECTIONS)
            .await
            .expect("create pool");

        pool.ping().await.expect("ping database");
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = ConnectionPool::new(":memory:", 1)
            .await
            .expect("create pool");

        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(pool.pool())
            .await
            .expect("read pragma");
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let pool = ConnectionPool::new(dir.path().join("wal.sqlite"), 2)
            .await
            .expect("create pool");

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(pool.pool())
            .await
            .expect("read pragma");
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_pool_close() {
        let pool = ConnectionPool::new(":memory:", 1)
            .await
            .expect("create pool");

        pool.close().await; // Should not panic
    }
}
