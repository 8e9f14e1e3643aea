//! Webhook subscriptions and the delivery log of completion notifications.

use crate::codec;
use crate::error::Result;
use fcc_core::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

/// A registered webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    /// Unique identifier for this webhook
    pub id: String,
    /// Endpoint receiving POSTed events
    pub url: String,
    /// Inactive webhooks receive nothing
    pub is_active: bool,
    /// Creation time
    pub created_at: Timestamp,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// The endpoint accepted the event
    Sent,
    /// The request failed or was rejected
    Failed,
}

impl DeliveryStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// A logged delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique identifier for this record
    pub id: String,
    /// Job the event was about
    pub scan_job_id: String,
    /// Delivery channel, e.g. `webhook`
    pub channel: String,
    /// Where the event was sent
    pub target: String,
    /// `sent` or `failed`
    pub status: String,
    /// JSON body that was sent
    pub payload: serde_json::Value,
    /// Failure description
    pub error_message: Option<String>,
    /// When the delivery was attempted
    pub created_at: Timestamp,
}

fn webhook_from_row(row: &SqliteRow) -> Result<Webhook> {
    Ok(Webhook {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        is_active: codec::flag(row, "is_active")?,
        created_at: codec::timestamp(row, "created_at")?,
    })
}

/// Register a webhook. Registering a known URL reactivates it.
///
/// # Errors
/// Returns `DatabaseError` if the write fails.
pub async fn add_webhook(pool: &Pool<Sqlite>, url: &str) -> Result<Webhook> {
    sqlx::query(
        "INSERT INTO webhooks (id, url, is_active, created_at) VALUES (?, ?, 1, ?)
         ON CONFLICT(url) DO UPDATE SET is_active = 1",
    )
    .bind(codec::new_id())
    .bind(url)
    .bind(Timestamp::now().to_rfc3339())
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT id, url, is_active, created_at FROM webhooks WHERE url = ?")
        .bind(url)
        .fetch_one(pool)
        .await?;
    webhook_from_row(&row)
}

/// Enable or disable a webhook. Returns whether it exists.
///
/// # Errors
/// Returns `DatabaseError` if the update fails.
pub async fn set_webhook_active(pool: &Pool<Sqlite>, id: &str, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE webhooks SET is_active = ? WHERE id = ?")
        .bind(i64::from(active))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Get all active webhooks.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn list_active_webhooks(pool: &Pool<Sqlite>) -> Result<Vec<Webhook>> {
    let rows = sqlx::query(
        "SELECT id, url, is_active, created_at FROM webhooks WHERE is_active = 1 ORDER BY created_at, rowid",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(webhook_from_row).collect()
}

/// Log a delivery attempt.
///
/// # Errors
/// Returns `DatabaseError` if the insert fails.
pub async fn record_delivery(
    pool: &Pool<Sqlite>,
    scan_job_id: &str,
    channel: &str,
    target: &str,
    status: DeliveryStatus,
    payload: &serde_json::Value,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO notifications (id, scan_job_id, channel, target, status, payload_json, error_message, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(codec::new_id())
    .bind(scan_job_id)
    .bind(channel)
    .bind(target)
    .bind(status.as_str())
    .bind(payload.to_string())
    .bind(error_message)
    .bind(Timestamp::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Get the deliveries logged for a job, oldest first.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn list_for_job(pool: &Pool<Sqlite>, scan_job_id: &str) -> Result<Vec<NotificationRecord>> {
    let rows = sqlx::query(
        "SELECT id, scan_job_id, channel, target, status, payload_json, error_message, created_at
         FROM notifications WHERE scan_job_id = ? ORDER BY created_at, rowid",
    )
    .bind(scan_job_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(NotificationRecord {
                id: row.try_get("id")?,
                scan_job_id: row.try_get("scan_job_id")?,
                channel: row.try_get("channel")?,
                target: row.try_get("target")?,
                status: row.try_get("status")?,
                payload: codec::json(row, "payload_json")?,
                error_message: row.try_get("error_message")?,
                created_at: codec::timestamp(row, "created_at")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_jobs::{create_scan_job, NewScanJob};
    use crate::Database;
    use fcc_core::ScanOptions;

    #[tokio::test]
    async fn test_webhook_registration() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");

        let hook = add_webhook(db.pool(), "https://hooks.example.com/a")
            .await
            .expect("add webhook");
        assert!(set_webhook_active(db.pool(), &hook.id, false)
            .await
            .expect("disable"));
        assert!(list_active_webhooks(db.pool()).await.expect("list").is_empty());

        let again = add_webhook(db.pool(), "https://hooks.example.com/a")
            .await
            .expect("re-add webhook");
        assert_eq!(again.id, hook.id);
        assert!(again.is_active);
    }

    #[tokio::test]
    async fn test_delivery_log() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");

        let job = create_scan_job(
            db.pool(),
            NewScanJob {
                created_by: "user-1".to_string(),
                keywords: vec!["casino".to_string()],
                exclude_keywords: Vec::new(),
                options: ScanOptions::default(),
                targets: Vec::new(),
            },
        )
        .await
        .expect("create job");

        let payload = serde_json::json!({ "event": "scan.completed", "scanJobId": job.id });
        record_delivery(
            db.pool(),
            &job.id,
            "webhook",
            "https://hooks.example.com/a",
            DeliveryStatus::Failed,
            &payload,
            Some("HTTP 503"),
        )
        .await
        .expect("record delivery");

        let log = list_for_job(db.pool(), &job.id).await.expect("list");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, "failed");
        assert_eq!(log[0].payload["event"], "scan.completed");
    }
}
