//! Completion notifications.
//!
//! The orchestrator calls [`ScanNotifier::notify_scan_completed`] once a job
//! reaches a terminal status. Errors are reported back but never change the
//! job's outcome.

use async_trait::async_trait;
use fcc_core::{JobStatus, NotificationConfig};
use fcc_db::notifications::{self, DeliveryStatus};
use fcc_db::DatabaseError;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use thiserror::Error;

/// Per-outcome target counts plus the number of unsuppressed matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Targets that completed
    pub completed: u32,
    /// Targets with errors and surviving matches
    pub partial: u32,
    /// Targets that failed
    pub failed: u32,
    /// Targets blocked by policy or an open circuit
    pub cancelled: u32,
    /// Unsuppressed matches across all targets
    pub matches: u32,
}

/// Body of a `scan.completed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionPayload {
    /// Final job status
    pub status: JobStatus,
    /// Outcome counts
    pub summary: ScanSummary,
}

/// Notification failures.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The delivery log could not be read or written.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Some endpoints did not accept the event.
    #[error("{failed} of {attempted} webhook deliveries failed")]
    Delivery {
        /// Deliveries that failed
        failed: usize,
        /// Deliveries attempted
        attempted: usize,
    },
}

/// Receives completion events.
#[async_trait]
pub trait ScanNotifier: Send + Sync {
    /// Announce that `job_id` finished.
    async fn notify_scan_completed(
        &self,
        job_id: &str,
        payload: &CompletionPayload,
    ) -> Result<(), NotifyError>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl ScanNotifier for LogNotifier {
    async fn notify_scan_completed(
        &self,
        job_id: &str,
        payload: &CompletionPayload,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            job_id,
            status = %payload.status,
            completed = payload.summary.completed,
            partial = payload.summary.partial,
            failed = payload.summary.failed,
            cancelled = payload.summary.cancelled,
            matches = payload.summary.matches,
            "scan completed"
        );
        Ok(())
    }
}

/// POSTs events to the configured webhook and every active `webhooks` row,
/// logging each delivery in `notifications`.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    pool: Pool<Sqlite>,
    client: reqwest::Client,
    default_url: Option<String>,
}

impl WebhookNotifier {
    /// Notifier using the configured default URL and timeout.
    ///
    /// # Errors
    /// Returns `NotifyError::Http` if the HTTP client cannot be built.
    pub fn new(pool: Pool<Sqlite>, config: &NotificationConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.webhook_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            pool,
            client,
            default_url: config
                .webhook_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
        })
    }

    async fn destinations(&self) -> Result<Vec<String>, NotifyError> {
        let mut urls: Vec<String> = self.default_url.iter().cloned().collect();
        for webhook in notifications::list_active_webhooks(&self.pool).await? {
            let url = webhook.url.trim().to_string();
            if !url.is_empty() && !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(urls)
    }

    async fn deliver(&self, url: &str, body: &serde_json::Value) -> Result<(), String> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("HTTP_{}", status.as_u16()))
        }
    }
}

#[async_trait]
impl ScanNotifier for WebhookNotifier {
    async fn notify_scan_completed(
        &self,
        job_id: &str,
        payload: &CompletionPayload,
    ) -> Result<(), NotifyError> {
        let urls = self.destinations().await?;
        if urls.is_empty() {
            return Ok(());
        }

        let body = serde_json::json!({
            "event": "scan.completed",
            "scanJobId": job_id,
            "payload": payload,
        });

        let outcomes =
            futures::future::join_all(urls.iter().map(|url| self.deliver(url, &body))).await;

        let mut failed = 0;
        for (url, outcome) in urls.iter().zip(outcomes) {
            let (status, error) = match outcome {
                Ok(()) => (DeliveryStatus::Sent, None),
                Err(e) => {
                    tracing::warn!(job_id, url = %url, "webhook delivery failed: {}", e);
                    failed += 1;
                    (DeliveryStatus::Failed, Some(e))
                }
            };
            notifications::record_delivery(
                &self.pool,
                job_id,
                "webhook",
                url,
                status,
                &body,
                error.as_deref(),
            )
            .await?;
        }

        if failed > 0 {
            return Err(NotifyError::Delivery {
                failed,
                attempted: urls.len(),
            });
        }
        Ok(())
    }
}
