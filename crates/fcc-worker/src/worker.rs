//! Claim/process loop.

use fcc_db::DatabaseError;
use fcc_scanner::{ScanError, ScanOrchestrator};
use std::time::Duration;

/// Pulls jobs off the queue one at a time.
pub struct Worker {
    orchestrator: ScanOrchestrator,
    worker_id: String,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(orchestrator: ScanOrchestrator, worker_id: String, poll_interval: Duration) -> Self {
        Self {
            orchestrator,
            worker_id,
            poll_interval,
        }
    }

    /// Claim the oldest queued job and process it. Returns whether a job was
    /// claimed.
    ///
    /// A job whose processing aborts is marked `failed`; a job whose claim was
    /// taken over is left to its new owner.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        let Some(job) = self.orchestrator.queue().claim_next(&self.worker_id).await? else {
            return Ok(false);
        };
        let epoch = job.claim_epoch;

        match self.orchestrator.process_scan_job(&job.id, &self.worker_id).await {
            Ok(finished) => {
                tracing::debug!(job_id = %finished.id, status = %finished.status, "job done");
            }
            Err(ScanError::Database(DatabaseError::ClaimLost { .. })) => {
                tracing::warn!(job_id = %job.id, epoch, "claim lost, abandoning job");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, "job processing aborted: {}", e);
                self.orchestrator
                    .mark_failed(&job.id, epoch, &e.to_string())
                    .await?;
            }
        }
        Ok(true)
    }

    /// Run until interrupted, or until one job was attempted when `once` is set.
    pub async fn run(&self, once: bool) -> anyhow::Result<()> {
        self.orchestrator.queue().recover_stale_jobs().await?;

        loop {
            let claimed = self.run_once().await?;
            if once {
                if !claimed {
                    tracing::info!("no queued jobs");
                }
                return Ok(());
            }
            if claimed {
                continue;
            }

            self.orchestrator.queue().recover_stale_jobs().await?;
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fcc_core::{CircuitConfig, JobStatus};
    use fcc_db::Database;
    use fcc_scanner::{
        CircuitBreaker, CreateScanRequest, FetchResponse, Fetcher, Scanner, SuppressionService,
    };
    use std::sync::Arc;

    /// Every page exists and is empty.
    struct EmptyWeb;

    #[async_trait]
    impl Fetcher for EmptyWeb {
        async fn fetch(&self, url: &str) -> FetchResponse {
            FetchResponse {
                url: url.to_string(),
                status: 200,
                content_type: Some("text/html".to_string()),
                location: None,
                body: "<html></html>".to_string(),
                error: None,
            }
        }
    }

    async fn setup() -> (Database, Worker) {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");
        let scanner = Scanner::new(
            Arc::new(EmptyWeb),
            SuppressionService::new(db.pool().clone()),
        );
        let orchestrator = ScanOrchestrator::new(
            db.pool().clone(),
            db.queue(Duration::from_secs(120)),
            scanner,
            CircuitBreaker::new(db.pool().clone(), &CircuitConfig::default()),
        );
        let worker = Worker::new(orchestrator, "worker-test".to_string(), Duration::from_millis(10));
        (db, worker)
    }

    #[tokio::test]
    async fn test_run_once_processes_queued_job() {
        let (_db, worker) = setup().await;
        let job = worker
            .orchestrator
            .create_scan_job(
                "user-1",
                CreateScanRequest {
                    targets: vec!["example.com".to_string()],
                    ..CreateScanRequest::default()
                },
            )
            .await
            .expect("create job");

        assert!(worker.run_once().await.expect("run"));
        assert!(!worker.run_once().await.expect("run"));

        let done = worker
            .orchestrator
            .get_scan_job(&job.id)
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.worker_id.as_deref(), Some("worker-test"));
    }

    #[tokio::test]
    async fn test_run_once_with_empty_queue() {
        let (_db, worker) = setup().await;
        worker.run(true).await.expect("run");
    }
}
