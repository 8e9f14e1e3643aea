//! FCC Database Layer
//!
//! Provides `SQLite` storage for scan jobs, their targets, results and
//! matches, the operator-managed suppression rules and domain policies, the
//! shared circuit breaker table, keyword sources and the notification log.
//! Also hosts the [`queue::JobQueue`] that hands jobs to worker processes.
//!
//! # Architecture
//!
//! - **Migrations**: SQL migrations are embedded and versioned using `SQLx`
//! - **Connection Pooling**: WAL journaling, busy timeout and foreign keys on every connection
//! - **One module per table**: free functions taking `&Pool<Sqlite>`
//! - **Claim fencing**: worker writes carry the claim epoch they were issued
//!
//! # Example
//!
//! ```ignore
//! use fcc_db::Database;
//!
//! let db = Database::new("checker.sqlite").await?;
//! db.run_migrations().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod codec;
pub mod connection;
pub mod domain_circuit;
pub mod domain_policies;
pub mod error;
pub mod keyword_sources;
pub mod migrations;
pub mod notifications;
pub mod queue;
pub mod scan_jobs;
pub mod scan_results;
pub mod scan_targets;
pub mod suppression_rules;

// Re-export commonly used types
pub use connection::{ConnectionPool, DEFAULT_MAX_CONNECTIONS};
pub use error::{DatabaseError, Result};
pub use queue::JobQueue;

use std::path::Path;

/// High-level database interface.
///
/// Wraps a [`ConnectionPool`] and exposes migrations and the raw pool used by
/// the table modules.
#[derive(Debug, Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open the database at `path` with the default pool size.
    ///
    /// # Arguments
    /// * `path` - Path to the database file (or `:memory:` for in-memory)
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_max_connections(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open the database at `path` with an explicit pool size.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn with_max_connections(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let pool = ConnectionPool::new(path, max_connections).await?;
        Ok(Self { pool })
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the version cannot be queried.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Build a job queue sharing this database's pool.
    #[must_use]
    pub fn queue(&self, stale_after: std::time::Duration) -> JobQueue {
        JobQueue::new(self.pool().clone(), stale_after)
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
