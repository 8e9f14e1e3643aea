//! Scan job records: creation, lookup and the fenced writes a claiming worker makes.
//!
//! Every write made on behalf of a worker carries the `claim_epoch` observed
//! when the job was claimed. A job recovered from a stale worker and claimed
//! again has a higher epoch, so the old worker's writes match zero rows and
//! surface as [`DatabaseError::ClaimLost`].

use crate::codec;
use crate::error::{DatabaseError, Result};
use crate::scan_targets::{self, NewScanTarget};
use fcc_core::{JobStatus, ScanOptions, TargetStatus, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqliteConnection};

pub(crate) const JOB_COLUMNS: &str = "id, created_by, status, target_count, keywords_json, \
     exclude_keywords_json, options_json, completed_count, partial_count, failed_count, \
     cancelled_count, match_count, error_message, worker_id, claim_epoch, created_at, \
     updated_at, queued_at, started_at, finished_at";

/// Per-outcome target counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    /// Targets scanned without fetch errors
    pub completed: u32,
    /// Targets with fetch errors that still produced matches
    pub partial: u32,
    /// Targets with fetch errors and no surviving matches
    pub failed: u32,
    /// Targets blocked by domain policy or an open circuit
    pub cancelled: u32,
}

impl OutcomeCounts {
    /// Count one more target with the given outcome.
    pub fn record(&mut self, status: TargetStatus) {
        match status {
            TargetStatus::Completed => self.completed += 1,
            TargetStatus::Partial => self.partial += 1,
            TargetStatus::Failed => self.failed += 1,
            TargetStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Targets counted so far.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.completed + self.partial + self.failed + self.cancelled
    }
}

/// A persisted scan job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    /// Unique identifier for the scan job
    pub id: String,
    /// User who created the job
    pub created_by: String,
    /// Lifecycle status
    pub status: JobStatus,
    /// Number of targets
    pub target_count: u32,
    /// Effective keywords, in scan order
    pub keywords: Vec<String>,
    /// Keywords removed from the effective set
    pub exclude_keywords: Vec<String>,
    /// Validated options
    pub options: ScanOptions,
    /// Target outcome counters (zero until the job finishes)
    pub counts: OutcomeCounts,
    /// Unsuppressed matches across all targets
    pub match_count: u32,
    /// Internal error that aborted processing, if any
    pub error_message: Option<String>,
    /// Worker that last claimed the job
    pub worker_id: Option<String>,
    /// Incremented on every claim
    pub claim_epoch: i64,
    /// Creation time
    pub created_at: Timestamp,
    /// Last write (doubles as the worker heartbeat while running)
    pub updated_at: Timestamp,
    /// When the job last entered the queue
    pub queued_at: Option<Timestamp>,
    /// When the job was last claimed
    pub started_at: Option<Timestamp>,
    /// When the job reached a terminal status
    pub finished_at: Option<Timestamp>,
}

/// Data needed to persist a new job.
#[derive(Debug, Clone)]
pub struct NewScanJob {
    /// User who created the job
    pub created_by: String,
    /// Effective keywords
    pub keywords: Vec<String>,
    /// Keywords removed from the effective set
    pub exclude_keywords: Vec<String>,
    /// Validated options
    pub options: ScanOptions,
    /// Targets in scan order
    pub targets: Vec<NewScanTarget>,
}

pub(crate) fn from_row(row: &SqliteRow) -> Result<ScanJob> {
    let status: String = row.try_get("status")?;
    Ok(ScanJob {
        id: row.try_get("id")?,
        created_by: row.try_get("created_by")?,
        status: JobStatus::parse(&status)?,
        target_count: codec::count(row, "target_count")?,
        keywords: codec::json(row, "keywords_json")?,
        exclude_keywords: codec::json(row, "exclude_keywords_json")?,
        options: codec::json(row, "options_json")?,
        counts: OutcomeCounts {
            completed: codec::count(row, "completed_count")?,
            partial: codec::count(row, "partial_count")?,
            failed: codec::count(row, "failed_count")?,
            cancelled: codec::count(row, "cancelled_count")?,
        },
        match_count: codec::count(row, "match_count")?,
        error_message: row.try_get("error_message")?,
        worker_id: row.try_get("worker_id")?,
        claim_epoch: row.try_get("claim_epoch")?,
        created_at: codec::timestamp(row, "created_at")?,
        updated_at: codec::timestamp(row, "updated_at")?,
        queued_at: codec::optional_timestamp(row, "queued_at")?,
        started_at: codec::optional_timestamp(row, "started_at")?,
        finished_at: codec::optional_timestamp(row, "finished_at")?,
    })
}

/// Persist a job and its targets in one transaction.
///
/// The job starts out `pending`; handing it to the queue is a separate step.
///
/// # Errors
/// Returns `DatabaseError` if serialization or any insert fails. Nothing is
/// written in that case.
pub async fn create_scan_job(pool: &Pool<Sqlite>, new_job: NewScanJob) -> Result<ScanJob> {
    let id = codec::new_id();
    let now = Timestamp::now();
    let target_count = u32::try_from(new_job.targets.len())
        .map_err(|_| DatabaseError::Decode("too many targets".to_string()))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO scan_jobs (id, created_by, status, target_count, keywords_json,
             exclude_keywords_json, options_json, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&new_job.created_by)
    .bind(JobStatus::Pending.as_str())
    .bind(i64::from(target_count))
    .bind(serde_json::to_string(&new_job.keywords)?)
    .bind(serde_json::to_string(&new_job.exclude_keywords)?)
    .bind(serde_json::to_string(&new_job.options)?)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    scan_targets::insert_all(&mut tx, &id, &new_job.targets, now).await?;

    tx.commit().await?;

    tracing::debug!(job_id = %id, target_count, "scan job persisted");

    Ok(ScanJob {
        id,
        created_by: new_job.created_by,
        status: JobStatus::Pending,
        target_count,
        keywords: new_job.keywords,
        exclude_keywords: new_job.exclude_keywords,
        options: new_job.options,
        counts: OutcomeCounts::default(),
        match_count: 0,
        error_message: None,
        worker_id: None,
        claim_epoch: 0,
        created_at: now,
        updated_at: now,
        queued_at: None,
        started_at: None,
        finished_at: None,
    })
}

/// Get a scan job by ID.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or the row cannot be decoded.
pub async fn get_scan_job(pool: &Pool<Sqlite>, id: &str) -> Result<Option<ScanJob>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;

    row.as_ref().map(from_row).transpose()
}

/// Get a scan job by ID, failing if it does not exist.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` for an unknown ID.
pub async fn require_scan_job(pool: &Pool<Sqlite>, id: &str) -> Result<ScanJob> {
    get_scan_job(pool, id)
        .await?
        .ok_or_else(|| DatabaseError::NotFoundWithMessage(format!("Scan job '{id}' not found")))
}

/// Refresh `updated_at` on a running job, provided `epoch` still owns it.
///
/// Runs on the caller's connection so it can share a transaction with the
/// write it guards.
pub(crate) async fn fence(
    conn: &mut SqliteConnection,
    job_id: &str,
    epoch: i64,
    now: Timestamp,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE scan_jobs SET updated_at = ?
         WHERE id = ? AND claim_epoch = ? AND status = 'running'",
    )
    .bind(now.to_rfc3339())
    .bind(job_id)
    .bind(epoch)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::ClaimLost {
            job_id: job_id.to_string(),
            epoch,
        });
    }
    Ok(())
}

/// Heartbeat a running job.
///
/// # Errors
/// Returns `DatabaseError::ClaimLost` if the job was reclaimed or is no longer running.
pub async fn touch(pool: &Pool<Sqlite>, job_id: &str, epoch: i64) -> Result<()> {
    let mut conn = pool.acquire().await?;
    fence(&mut conn, job_id, epoch, Timestamp::now()).await
}

/// Move a running job to its terminal status with final counters.
///
/// # Errors
/// Returns `DatabaseError::ClaimLost` if `epoch` no longer owns the job.
pub async fn finish_scan_job(
    pool: &Pool<Sqlite>,
    job_id: &str,
    epoch: i64,
    status: JobStatus,
    counts: OutcomeCounts,
    match_count: u32,
) -> Result<ScanJob> {
    let now = Timestamp::now();
    let result = sqlx::query(
        "UPDATE scan_jobs
         SET status = ?, completed_count = ?, partial_count = ?, failed_count = ?,
             cancelled_count = ?, match_count = ?, updated_at = ?, finished_at = ?
         WHERE id = ? AND claim_epoch = ? AND status = 'running'",
    )
    .bind(status.as_str())
    .bind(i64::from(counts.completed))
    .bind(i64::from(counts.partial))
    .bind(i64::from(counts.failed))
    .bind(i64::from(counts.cancelled))
    .bind(i64::from(match_count))
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(job_id)
    .bind(epoch)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::ClaimLost {
            job_id: job_id.to_string(),
            epoch,
        });
    }

    require_scan_job(pool, job_id).await
}

/// Mark a running job `failed` after an internal error aborted its processing.
///
/// Returns `false` when `epoch` no longer owns the job, in which case nothing
/// is written.
///
/// # Errors
/// Returns `DatabaseError` if the update itself fails.
pub async fn mark_failed(
    pool: &Pool<Sqlite>,
    job_id: &str,
    epoch: i64,
    message: &str,
) -> Result<bool> {
    let now = Timestamp::now();
    let result = sqlx::query(
        "UPDATE scan_jobs SET status = 'failed', error_message = ?, updated_at = ?, finished_at = ?
         WHERE id = ? AND claim_epoch = ? AND status = 'running'",
    )
    .bind(message)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(job_id)
    .bind(epoch)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
