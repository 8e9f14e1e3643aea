//! Targets of a scan job, kept in insertion order and never modified.

use crate::codec;
use crate::error::Result;
use fcc_core::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqliteConnection};

/// A single target of a scan job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    /// Unique identifier for this target
    pub id: String,
    /// Owning scan job
    pub scan_job_id: String,
    /// Zero-based insertion order
    pub position: u32,
    /// The string the caller supplied
    pub raw_input: String,
    /// Canonical URL the scanner visits
    pub normalized_url: String,
    /// When the target was recorded
    pub created_at: Timestamp,
}

/// Target data supplied when a job is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScanTarget {
    /// The string the caller supplied
    pub raw_input: String,
    /// Canonical URL the scanner visits
    pub normalized_url: String,
}

pub(crate) async fn insert_all(
    conn: &mut SqliteConnection,
    scan_job_id: &str,
    targets: &[NewScanTarget],
    created_at: Timestamp,
) -> Result<Vec<ScanTarget>> {
    let mut inserted = Vec::with_capacity(targets.len());
    for (position, target) in (0u32..).zip(targets) {
        let id = codec::new_id();
        sqlx::query(
            "INSERT INTO scan_targets (id, scan_job_id, position, raw_input, normalized_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(scan_job_id)
        .bind(i64::from(position))
        .bind(&target.raw_input)
        .bind(&target.normalized_url)
        .bind(created_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;

        inserted.push(ScanTarget {
            id,
            scan_job_id: scan_job_id.to_string(),
            position,
            raw_input: target.raw_input.clone(),
            normalized_url: target.normalized_url.clone(),
            created_at,
        });
    }
    Ok(inserted)
}

fn from_row(row: &SqliteRow) -> Result<ScanTarget> {
    Ok(ScanTarget {
        id: row.try_get("id")?,
        scan_job_id: row.try_get("scan_job_id")?,
        position: codec::count(row, "position")?,
        raw_input: row.try_get("raw_input")?,
        normalized_url: row.try_get("normalized_url")?,
        created_at: codec::timestamp(row, "created_at")?,
    })
}

/// Get all targets of a scan job in insertion order.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row cannot be decoded.
pub async fn get_by_scan_job(pool: &Pool<Sqlite>, scan_job_id: &str) -> Result<Vec<ScanTarget>> {
    let rows = sqlx::query(
        "SELECT id, scan_job_id, position, raw_input, normalized_url, created_at
         FROM scan_targets WHERE scan_job_id = ? ORDER BY position",
    )
    .bind(scan_job_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}
