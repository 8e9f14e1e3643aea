//! Durable job queue on top of `scan_jobs`.
//!
//! Claims are serialized by `SQLite` itself: the select-then-update runs in a
//! `BEGIN IMMEDIATE` transaction, which takes the write lock up front, and
//! the update is additionally guarded by `status = 'queued'`. No other lock
//! is involved, so any number of worker processes can share one database.

use crate::error::Result;
use crate::scan_jobs::{self, ScanJob, JOB_COLUMNS};
use fcc_core::Timestamp;
use sqlx::{Pool, Row, Sqlite, SqliteConnection};
use std::time::Duration;

/// Claimable work queue of scan jobs.
#[derive(Debug, Clone)]
pub struct JobQueue {
    pool: Pool<Sqlite>,
    stale_after: Duration,
}

impl JobQueue {
    /// Create a queue over `pool`. Running jobs untouched for `stale_after`
    /// are considered abandoned.
    #[must_use]
    pub fn new(pool: Pool<Sqlite>, stale_after: Duration) -> Self {
        Self { pool, stale_after }
    }

    /// How long a running job may go without a heartbeat before recovery
    /// re-queues it.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Move a `pending` job to `queued`. Returns whether it moved.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the update fails.
    pub async fn enqueue(&self, job_id: &str) -> Result<bool> {
        let now = Timestamp::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE scan_jobs SET status = 'queued', queued_at = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(&now)
        .bind(&now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected() > 0;
        if moved {
            tracing::debug!(job_id, "scan job queued");
        }
        Ok(moved)
    }

    /// Claim the oldest queued job for `worker_id`.
    ///
    /// Returns `None` when nothing is queued or another worker won the race;
    /// callers simply poll again. A successful claim bumps the job's
    /// `claim_epoch`.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the transaction fails. The transaction is
    /// rolled back in that case.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<ScanJob>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match claim_in_transaction(&mut conn, worker_id).await {
            Ok(claimed) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                if let Some(job) = &claimed {
                    tracing::info!(
                        job_id = %job.id,
                        worker_id,
                        epoch = job.claim_epoch,
                        "scan job claimed"
                    );
                }
                Ok(claimed)
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::warn!("rollback after failed claim also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Claim one particular job that is still `pending` or `queued`.
    ///
    /// Returns `None` if the job does not exist or is already running or
    /// finished. A successful claim bumps the job's `claim_epoch`.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the update fails.
    pub async fn claim(&self, job_id: &str, worker_id: &str) -> Result<Option<ScanJob>> {
        let now = Timestamp::now().to_rfc3339();
        let updated = sqlx::query(
            "UPDATE scan_jobs
             SET status = 'running', worker_id = ?, claim_epoch = claim_epoch + 1,
                 started_at = ?, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'queued')",
        )
        .bind(worker_id)
        .bind(&now)
        .bind(&now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        tracing::info!(job_id, worker_id, "scan job claimed directly");
        scan_jobs::get_scan_job(&self.pool, job_id).await
    }

    /// Hand running jobs whose last update is older than the staleness
    /// threshold back to the queue. Returns how many were recovered.
    ///
    /// A recovered job is retried from the start by whoever claims it next.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the update fails.
    pub async fn recover_stale_jobs(&self) -> Result<u64> {
        let now = Timestamp::now();
        let stale_secs = i64::try_from(self.stale_after.as_secs()).unwrap_or(i64::MAX / 2);
        let cutoff = now.offset_secs(-stale_secs);

        let result = sqlx::query(
            "UPDATE scan_jobs SET status = 'queued', worker_id = NULL, queued_at = ?, updated_at = ?
             WHERE status = 'running' AND updated_at < ?",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            tracing::warn!(recovered, "re-queued stale scan jobs");
        }
        Ok(recovered)
    }

    /// Cancel a job that has not been claimed yet. Returns whether it was
    /// cancelled; running and finished jobs are left alone.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the update fails.
    pub async fn mark_cancelled(&self, job_id: &str) -> Result<bool> {
        let now = Timestamp::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE scan_jobs SET status = 'cancelled', updated_at = ?, finished_at = ?
             WHERE id = ? AND status IN ('pending', 'queued')",
        )
        .bind(&now)
        .bind(&now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn claim_in_transaction(
    conn: &mut SqliteConnection,
    worker_id: &str,
) -> Result<Option<ScanJob>> {
    let Some(row) = sqlx::query(
        "SELECT id FROM scan_jobs WHERE status = 'queued' ORDER BY created_at, rowid LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };
    let job_id: String = row.try_get("id")?;

    let now = Timestamp::now().to_rfc3339();
    let updated = sqlx::query(
        "UPDATE scan_jobs
         SET status = 'running', worker_id = ?, claim_epoch = claim_epoch + 1,
             started_at = ?, updated_at = ?
         WHERE id = ? AND status = 'queued'",
    )
    .bind(worker_id)
    .bind(&now)
    .bind(&now)
    .bind(&job_id)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(None);
    }

    let sql = format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = ?");
    let row = sqlx::query(&sql).bind(&job_id).fetch_one(&mut *conn).await?;
    scan_jobs::from_row(&row).map(Some)
}
