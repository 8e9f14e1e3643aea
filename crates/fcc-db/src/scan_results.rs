//! Per-target scan results and their matches.

use crate::codec;
use crate::error::{DatabaseError, Result};
use crate::scan_jobs;
use fcc_core::{FetchDetail, TargetStatus, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;

/// A keyword hit recorded against a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMatch {
    /// Unique identifier for this match
    pub id: String,
    /// Owning result
    pub scan_result_id: String,
    /// Keyword that matched
    pub keyword: String,
    /// Anchor text or result title
    pub title: String,
    /// Absolute URL of the matching link
    pub url: String,
    /// Strategy that produced the match
    pub source: String,
    /// Relevance score in `0..=100`
    pub severity: u8,
    /// Excluded from effective results by a suppression rule
    pub is_suppressed: bool,
}

impl ScanMatch {
    /// Signature used to compare matches across jobs.
    #[must_use]
    pub fn signature(&self) -> String {
        match_signature(&self.keyword, &self.url)
    }
}

/// Signature of a `(keyword, url)` pair: `lower(keyword)|lower(url)`.
#[must_use]
pub fn match_signature(keyword: &str, url: &str) -> String {
    format!("{}|{}", keyword.to_lowercase(), url.to_lowercase())
}

/// Outcome of scanning one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Unique identifier for this result
    pub id: String,
    /// Owning scan job
    pub scan_job_id: String,
    /// Target that was scanned
    pub scan_target_id: String,
    /// Target outcome
    pub status: TargetStatus,
    /// Machine-readable code of the first error, if any
    pub error_code: Option<String>,
    /// All error messages, `; `-joined
    pub error_message: Option<String>,
    /// `scheme://host[:port]` the target resolved to
    pub base_url: Option<String>,
    /// Every fetch made for this target, in order
    pub fetch_details: Vec<FetchDetail>,
    /// Unsuppressed matches
    pub match_count: u32,
    /// All matches, suppressed ones included, in discovery order
    pub matches: Vec<ScanMatch>,
    /// When the result was recorded
    pub created_at: Timestamp,
}

/// Match data supplied by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScanMatch {
    /// Keyword that matched
    pub keyword: String,
    /// Anchor text or result title
    pub title: String,
    /// Absolute URL of the matching link
    pub url: String,
    /// Strategy that produced the match
    pub source: String,
    /// Relevance score in `0..=100`
    pub severity: u8,
    /// Excluded by a suppression rule
    pub is_suppressed: bool,
}

/// Result data supplied by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScanResult {
    /// Target that was scanned
    pub scan_target_id: String,
    /// Target outcome
    pub status: TargetStatus,
    /// Machine-readable code of the first error, if any
    pub error_code: Option<String>,
    /// All error messages
    pub error_message: Option<String>,
    /// Resolved base URL
    pub base_url: Option<String>,
    /// Fetch diagnostics
    pub fetch_details: Vec<FetchDetail>,
    /// All matches, suppressed ones included
    pub matches: Vec<NewScanMatch>,
}

/// Persist one target result with its matches.
///
/// The write is fenced by the worker's claim epoch and heartbeats the job in
/// the same transaction.
///
/// # Errors
/// Returns `DatabaseError::ClaimLost` if `epoch` no longer owns the job, or
/// `DatabaseError` if any insert fails. Nothing is written on error.
pub async fn record_result(
    pool: &Pool<Sqlite>,
    scan_job_id: &str,
    epoch: i64,
    result: NewScanResult,
) -> Result<ScanResult> {
    let now = Timestamp::now();
    let id = codec::new_id();
    let match_count = u32::try_from(result.matches.iter().filter(|m| !m.is_suppressed).count())
        .map_err(|_| DatabaseError::Decode("too many matches".to_string()))?;

    let mut tx = pool.begin().await?;
    scan_jobs::fence(&mut tx, scan_job_id, epoch, now).await?;

    sqlx::query(
        "INSERT INTO scan_results (id, scan_job_id, scan_target_id, status, error_code,
             error_message, base_url, fetch_details_json, match_count, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(scan_job_id)
    .bind(&result.scan_target_id)
    .bind(result.status.as_str())
    .bind(&result.error_code)
    .bind(&result.error_message)
    .bind(&result.base_url)
    .bind(serde_json::to_string(&result.fetch_details)?)
    .bind(i64::from(match_count))
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    let mut matches = Vec::with_capacity(result.matches.len());
    for (position, m) in (0i64..).zip(result.matches) {
        let match_id = codec::new_id();
        sqlx::query(
            "INSERT INTO scan_matches (id, scan_result_id, scan_job_id, position, keyword, title,
                 url, source, severity, is_suppressed, signature, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&match_id)
        .bind(&id)
        .bind(scan_job_id)
        .bind(position)
        .bind(&m.keyword)
        .bind(&m.title)
        .bind(&m.url)
        .bind(&m.source)
        .bind(i64::from(m.severity))
        .bind(i64::from(m.is_suppressed))
        .bind(match_signature(&m.keyword, &m.url))
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        matches.push(ScanMatch {
            id: match_id,
            scan_result_id: id.clone(),
            keyword: m.keyword,
            title: m.title,
            url: m.url,
            source: m.source,
            severity: m.severity,
            is_suppressed: m.is_suppressed,
        });
    }

    tx.commit().await?;

    Ok(ScanResult {
        id,
        scan_job_id: scan_job_id.to_string(),
        scan_target_id: result.scan_target_id,
        status: result.status,
        error_code: result.error_code,
        error_message: result.error_message,
        base_url: result.base_url,
        fetch_details: result.fetch_details,
        match_count,
        matches,
        created_at: now,
    })
}

/// Remove results a previous owner left behind, so a reclaimed job restarts clean.
///
/// Returns the number of results removed.
///
/// # Errors
/// Returns `DatabaseError::ClaimLost` if `epoch` no longer owns the job.
pub async fn clear_for_job(pool: &Pool<Sqlite>, scan_job_id: &str, epoch: i64) -> Result<u64> {
    let mut tx = pool.begin().await?;
    scan_jobs::fence(&mut tx, scan_job_id, epoch, Timestamp::now()).await?;

    let deleted = sqlx::query("DELETE FROM scan_results WHERE scan_job_id = ?")
        .bind(scan_job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(deleted)
}

fn match_from_row(row: &SqliteRow) -> Result<ScanMatch> {
    let severity: i64 = row.try_get("severity")?;
    Ok(ScanMatch {
        id: row.try_get("id")?,
        scan_result_id: row.try_get("scan_result_id")?,
        keyword: row.try_get("keyword")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        source: row.try_get("source")?,
        severity: u8::try_from(severity)
            .map_err(|_| DatabaseError::Decode(format!("severity out of range: {severity}")))?,
        is_suppressed: codec::flag(row, "is_suppressed")?,
    })
}

fn result_from_row(row: &SqliteRow) -> Result<ScanResult> {
    let status: String = row.try_get("status")?;
    Ok(ScanResult {
        id: row.try_get("id")?,
        scan_job_id: row.try_get("scan_job_id")?,
        scan_target_id: row.try_get("scan_target_id")?,
        status: TargetStatus::parse(&status)?,
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        base_url: row.try_get("base_url")?,
        fetch_details: codec::json(row, "fetch_details_json")?,
        match_count: codec::count(row, "match_count")?,
        matches: Vec::new(),
        created_at: codec::timestamp(row, "created_at")?,
    })
}

/// Get all results of a job, in target order, each with its matches.
///
/// # Errors
/// Returns `DatabaseError` if a query fails or a row cannot be decoded.
pub async fn get_by_scan_job(pool: &Pool<Sqlite>, scan_job_id: &str) -> Result<Vec<ScanResult>> {
    let rows = sqlx::query(
        "SELECT r.id, r.scan_job_id, r.scan_target_id, r.status, r.error_code, r.error_message,
                r.base_url, r.fetch_details_json, r.match_count, r.created_at
         FROM scan_results r
         JOIN scan_targets t ON t.id = r.scan_target_id
         WHERE r.scan_job_id = ?
         ORDER BY t.position",
    )
    .bind(scan_job_id)
    .fetch_all(pool)
    .await?;

    let mut results = rows
        .iter()
        .map(result_from_row)
        .collect::<Result<Vec<_>>>()?;

    let match_rows = sqlx::query(
        "SELECT id, scan_result_id, keyword, title, url, source, severity, is_suppressed
         FROM scan_matches WHERE scan_job_id = ? ORDER BY scan_result_id, position",
    )
    .bind(scan_job_id)
    .fetch_all(pool)
    .await?;

    let mut by_result: HashMap<String, Vec<ScanMatch>> = HashMap::new();
    for row in &match_rows {
        let m = match_from_row(row)?;
        by_result.entry(m.scan_result_id.clone()).or_default().push(m);
    }
    for result in &mut results {
        result.matches = by_result.remove(&result.id).unwrap_or_default();
    }

    Ok(results)
}

/// An unsuppressed match keyed by its cross-job signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMatch {
    /// `lower(keyword)|lower(url)`
    pub signature: String,
    /// Keyword that matched
    pub keyword: String,
    /// Absolute URL of the matching link
    pub url: String,
    /// Anchor text or result title
    pub title: String,
    /// Relevance score in `0..=100`
    pub severity: u8,
    /// Target the match was found on, as the caller supplied it
    pub target: String,
}

/// Unsuppressed matches of a job, one per signature, in target then discovery order.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row cannot be decoded.
pub async fn effective_matches(pool: &Pool<Sqlite>, scan_job_id: &str) -> Result<Vec<SignedMatch>> {
    let rows = sqlx::query(
        "SELECT m.signature, m.keyword, m.url, m.title, m.severity, t.raw_input AS target
         FROM scan_matches m
         JOIN scan_results r ON r.id = m.scan_result_id
         JOIN scan_targets t ON t.id = r.scan_target_id
         WHERE m.scan_job_id = ? AND m.is_suppressed = 0
         ORDER BY t.position, m.position",
    )
    .bind(scan_job_id)
    .fetch_all(pool)
    .await?;

    let mut seen = std::collections::HashSet::new();
    let mut matches = Vec::with_capacity(rows.len());
    for row in &rows {
        let signature: String = row.try_get("signature")?;
        if !seen.insert(signature.clone()) {
            continue;
        }
        let severity: i64 = row.try_get("severity")?;
        matches.push(SignedMatch {
            signature,
            keyword: row.try_get("keyword")?,
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            severity: u8::try_from(severity)
                .map_err(|_| DatabaseError::Decode(format!("severity out of range: {severity}")))?,
            target: row.try_get("target")?,
        });
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobQueue;
    use crate::scan_jobs::{create_scan_job, NewScanJob, ScanJob};
    use crate::scan_targets::{self, NewScanTarget};
    use crate::Database;
    use fcc_core::ScanOptions;
    use std::time::Duration;

    async fn running_job(db: &Database) -> ScanJob {
        let job = create_scan_job(
            db.pool(),
            NewScanJob {
                created_by: "user-1".to_string(),
                keywords: vec!["casino".to_string()],
                exclude_keywords: Vec::new(),
                options: ScanOptions::default(),
                targets: vec![NewScanTarget {
                    raw_input: "example.com".to_string(),
                    normalized_url: "https://example.com".to_string(),
                }],
            },
        )
        .await
        .expect("create scan job");

        let queue = JobQueue::new(db.pool().clone(), Duration::from_secs(120));
        queue.enqueue(&job.id).await.expect("enqueue");
        queue
            .claim_next("worker-1")
            .await
            .expect("claim")
            .expect("job available")
    }

    fn hit(keyword: &str, url: &str, suppressed: bool) -> NewScanMatch {
        NewScanMatch {
            keyword: keyword.to_string(),
            title: format!("About {keyword}"),
            url: url.to_string(),
            source: "site_search".to_string(),
            severity: 70,
            is_suppressed: suppressed,
        }
    }

    async fn result_for(db: &Database, job: &ScanJob, matches: Vec<NewScanMatch>) -> NewScanResult {
        let targets = scan_targets::get_by_scan_job(db.pool(), &job.id)
            .await
            .expect("load targets");
        NewScanResult {
            scan_target_id: targets[0].id.clone(),
            status: TargetStatus::Completed,
            error_code: None,
            error_message: None,
            base_url: Some("https://example.com".to_string()),
            fetch_details: vec![FetchDetail {
                url: "https://example.com/?s=casino".to_string(),
                http_status: 200,
                content_type: Some("text/html".to_string()),
                error: None,
            }],
            matches,
        }
    }

    #[tokio::test]
    async fn test_record_and_load_results() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");
        let job = running_job(&db).await;

        let new_result = result_for(
            &db,
            &job,
            vec![
                hit("casino", "https://example.com/casino", false),
                hit("casino", "https://example.com/promo", true),
            ],
        )
        .await;
        let stored = record_result(db.pool(), &job.id, job.claim_epoch, new_result)
            .await
            .expect("record result");
        assert_eq!(stored.match_count, 1);

        let results = get_by_scan_job(db.pool(), &job.id).await.expect("load");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].matches.len(), 2);
        assert!(results[0].matches[1].is_suppressed);
        assert_eq!(results[0].fetch_details[0].http_status, 200);

        let effective = effective_matches(db.pool(), &job.id).await.expect("effective matches");
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].signature, "casino|https://example.com/casino");
        assert_eq!(effective[0].target, "example.com");
    }

    #[tokio::test]
    async fn test_stale_epoch_cannot_write() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");
        let job = running_job(&db).await;

        let new_result = result_for(&db, &job, Vec::new()).await;
        let err = record_result(db.pool(), &job.id, job.claim_epoch - 1, new_result)
            .await
            .expect_err("stale epoch");
        assert!(matches!(err, DatabaseError::ClaimLost { .. }));

        let results = get_by_scan_job(db.pool(), &job.id).await.expect("load");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_clear_for_job() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");
        let job = running_job(&db).await;

        let new_result = result_for(&db, &job, vec![hit("casino", "https://example.com/a", false)]).await;
        record_result(db.pool(), &job.id, job.claim_epoch, new_result)
            .await
            .expect("record result");

        let removed = clear_for_job(db.pool(), &job.id, job.claim_epoch)
            .await
            .expect("clear");
        assert_eq!(removed, 1);
        assert!(effective_matches(db.pool(), &job.id)
            .await
            .expect("effective matches")
            .is_empty());
    }

    #[test]
    fn test_match_signature_is_case_insensitive() {
        assert_eq!(
            match_signature("Casino", "https://Example.com/Casino"),
            "casino|https://example.com/casino"
        );
    }
}
