//! Scan orchestrator: job creation, processing and baseline comparison.
//!
//! The `ScanOrchestrator` owns the job state machine
//! (`pending → queued → running → terminal`). Targets of a job are scanned
//! strictly in order; each one is first checked against the domain policy and
//! the domain's circuit breaker, so blocked targets never touch the network.
//! Every write made while processing is fenced by the claim epoch the worker
//! holds, which keeps a reclaimed job from being written twice.

use crate::circuit::CircuitBreaker;
use crate::error::{Result, ScanError};
use crate::fetch::FetchPipeline;
use crate::matcher::KeywordMatcher;
use crate::normalizer::{base_url, host_of, normalize_input};
use crate::notify::{CompletionPayload, LogNotifier, ScanNotifier, ScanSummary, WebhookNotifier};
use crate::policy::DomainPolicySet;
use crate::scanner::{Scanner, TargetScan};
use crate::suppression::SuppressionService;
use fcc_core::{AppConfig, JobStatus, KeywordMode, ScanIssue, ScanOptions, TargetStatus};
use fcc_db::scan_jobs::{self, NewScanJob, OutcomeCounts, ScanJob};
use fcc_db::scan_results::{self, NewScanMatch, NewScanResult, ScanResult, SignedMatch};
use fcc_db::scan_targets::{self, NewScanTarget};
use fcc_db::{keyword_sources, JobQueue};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Keyword used when a request names no keywords and no profile or keyword
/// set supplies any.
pub const DEFAULT_KEYWORD: &str = "casino";

/// Payload accepted by [`ScanOrchestrator::create_scan_job`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateScanRequest {
    /// Domains or URLs; an entry may hold several, one per line
    pub targets: Vec<String>,
    /// Explicit keywords
    pub keywords: Option<Vec<String>>,
    /// Keywords removed from the final list
    pub exclude_keywords: Vec<String>,
    /// Matching mode, `contains` when absent
    pub keyword_mode: Option<KeywordMode>,
    /// Legacy flag promoting `contains` to `exact`
    pub exact_match: bool,
    /// Site-search page cap
    pub max_pages: Option<u32>,
    /// Per-keyword result cap
    pub max_results_per_keyword: Option<u32>,
    /// Earlier job to compare against
    pub baseline_scan_job_id: Option<String>,
    /// Scan profile contributing keywords
    pub scan_profile_id: Option<String>,
    /// Keyword set contributing include and exclude terms
    pub keyword_set_id: Option<String>,
}

/// Difference between the matches of two jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineDiff {
    /// Job being compared
    pub scan_job_id: String,
    /// Job compared against
    pub baseline_scan_job_id: String,
    /// Matches absent from the baseline
    pub new: Vec<SignedMatch>,
    /// Baseline matches no longer present
    pub resolved: Vec<SignedMatch>,
    /// Matches present in both
    #[serde(rename = "unchanged_count")]
    pub unchanged_count: usize,
}

/// Final job status from per-target outcome counts.
///
/// Any failure with at least one other outcome is `partial`; only failures is
/// `failed`. Without failures, a job whose targets were all blocked is
/// `cancelled`, one with partial targets is `partial`, anything else
/// `completed`.
#[must_use]
pub fn aggregate_status(counts: &OutcomeCounts) -> JobStatus {
    if counts.failed > 0 {
        if counts.completed + counts.partial + counts.cancelled > 0 {
            JobStatus::Partial
        } else {
            JobStatus::Failed
        }
    } else if counts.completed + counts.partial == 0 && counts.cancelled > 0 {
        JobStatus::Cancelled
    } else if counts.partial > 0 {
        JobStatus::Partial
    } else {
        JobStatus::Completed
    }
}

/// Coordinates scan jobs from creation to notification.
pub struct ScanOrchestrator {
    /// Shared storage
    pool: Pool<Sqlite>,
    /// Queue jobs are handed to workers through
    queue: JobQueue,
    /// Per-target crawler
    scanner: Scanner,
    /// Per-domain failure tracking
    circuit: CircuitBreaker,
    /// Completion events
    notifier: Arc<dyn ScanNotifier>,
    /// Page cap for requests that name none
    default_max_pages: u32,
    /// Per-keyword result cap for requests that name none
    default_max_results: u32,
    /// How often a running job is touched while a target is being crawled
    heartbeat_interval: Duration,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("queue", &self.queue)
            .field("scanner", &self.scanner)
            .field("circuit", &self.circuit)
            .finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    /// Create an orchestrator that announces completions through the log only.
    #[must_use]
    pub fn new(
        pool: Pool<Sqlite>,
        queue: JobQueue,
        scanner: Scanner,
        circuit: CircuitBreaker,
    ) -> Self {
        let heartbeat_interval = (queue.stale_after() / 4).max(Duration::from_millis(100));
        Self {
            pool,
            queue,
            scanner,
            circuit,
            notifier: Arc::new(LogNotifier),
            default_max_pages: ScanOptions::DEFAULT_MAX_PAGES,
            default_max_results: ScanOptions::DEFAULT_MAX_RESULTS,
            heartbeat_interval,
        }
    }

    /// Production wiring: `reqwest` fetch pipeline, webhook notifications and
    /// the configured circuit and queue settings.
    ///
    /// # Errors
    /// Returns `ScanError::Notify` if the webhook client cannot be built.
    pub fn from_config(pool: Pool<Sqlite>, config: &AppConfig) -> Result<Self> {
        let fetcher = Arc::new(FetchPipeline::from_config(&config.scanner));
        let scanner = Scanner::new(fetcher, SuppressionService::new(pool.clone()));
        let queue = JobQueue::new(
            pool.clone(),
            Duration::from_secs(config.queue.stale_after_secs),
        );
        let circuit = CircuitBreaker::new(pool.clone(), &config.circuit);
        let notifier = WebhookNotifier::new(pool.clone(), &config.notifications)?;

        Ok(Self::new(pool, queue, scanner, circuit)
            .with_notifier(Arc::new(notifier))
            .with_scan_defaults(config.scanner.max_pages, config.scanner.max_results_per_keyword))
    }

    /// Caps applied when a request leaves them out. Still clamped to the
    /// allowed ranges.
    #[must_use]
    pub fn with_scan_defaults(mut self, max_pages: u32, max_results_per_keyword: u32) -> Self {
        self.default_max_pages = max_pages;
        self.default_max_results = max_results_per_keyword;
        self
    }

    /// Replace the heartbeat period used while crawling a target.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Replace the completion notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn ScanNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// The job queue.
    #[must_use]
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// The per-target scanner.
    #[must_use]
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Validate a request, store the job with its targets and queue it.
    ///
    /// # Errors
    /// - `ScanError::Validation` when no valid target or no keyword remains
    /// - `ScanError::InvalidKeyword` when a regex keyword does not compile
    /// - `ScanError::NotFound` when a referenced profile, keyword set or
    ///   baseline job does not exist
    pub async fn create_scan_job(&self, user_id: &str, request: CreateScanRequest) -> Result<ScanJob> {
        let targets = normalize_targets(&request.targets);
        if targets.is_empty() {
            return Err(ScanError::Validation(
                "At least one valid target is required.".to_string(),
            ));
        }

        let (keywords, excludes) = self.resolve_keywords(&request).await?;
        if keywords.is_empty() {
            return Err(ScanError::Validation(
                "At least one keyword is required after exclusions.".to_string(),
            ));
        }

        let mode = KeywordMode::resolve(request.keyword_mode, request.exact_match);
        if mode == KeywordMode::Regex {
            for keyword in &keywords {
                KeywordMatcher::new(keyword, mode)?;
            }
        }

        if let Some(baseline_id) = &request.baseline_scan_job_id {
            if scan_jobs::get_scan_job(&self.pool, baseline_id).await?.is_none() {
                return Err(ScanError::NotFound(format!("baseline scan job {baseline_id}")));
            }
        }

        let mut options = ScanOptions::clamped(
            mode,
            Some(request.max_pages.unwrap_or(self.default_max_pages)),
            Some(
                request
                    .max_results_per_keyword
                    .unwrap_or(self.default_max_results),
            ),
        );
        options.baseline_scan_job_id = request.baseline_scan_job_id;
        options.scan_profile_id = request.scan_profile_id;
        options.keyword_set_id = request.keyword_set_id;

        let job = scan_jobs::create_scan_job(
            &self.pool,
            NewScanJob {
                created_by: user_id.to_string(),
                keywords,
                exclude_keywords: excludes,
                options,
                targets,
            },
        )
        .await?;
        self.queue.enqueue(&job.id).await?;

        tracing::info!(
            job_id = %job.id,
            user_id,
            targets = job.target_count,
            keywords = job.keywords.len(),
            "scan job created"
        );
        Ok(scan_jobs::require_scan_job(&self.pool, &job.id).await?)
    }

    /// Effective keyword list and the exclusions that shaped it.
    async fn resolve_keywords(&self, request: &CreateScanRequest) -> Result<(Vec<String>, Vec<String>)> {
        let mut included: Vec<String> = Vec::new();
        let mut excluded: Vec<String> = Vec::new();

        if let Some(profile_id) = &request.scan_profile_id {
            let profile = keyword_sources::get_profile(&self.pool, profile_id)
                .await?
                .ok_or_else(|| ScanError::NotFound(format!("scan profile {profile_id}")))?;
            included.extend(profile.keywords);
        }
        if let Some(set_id) = &request.keyword_set_id {
            let set = keyword_sources::get_keyword_set(&self.pool, set_id)
                .await?
                .ok_or_else(|| ScanError::NotFound(format!("keyword set {set_id}")))?;
            included.extend(set.include_terms);
            excluded.extend(set.exclude_terms);
        }
        match &request.keywords {
            Some(keywords) => included.extend(keywords.iter().cloned()),
            None if included.is_empty() => included.push(DEFAULT_KEYWORD.to_string()),
            None => {}
        }
        excluded.extend(request.exclude_keywords.iter().cloned());

        let excluded = dedup_trimmed(excluded);
        let blocked: HashSet<String> = excluded.iter().map(|k| k.to_lowercase()).collect();
        let keywords = dedup_trimmed(included)
            .into_iter()
            .filter(|k| !blocked.contains(&k.to_lowercase()))
            .collect();
        Ok((keywords, excluded))
    }

    /// Run a job to completion on behalf of `worker_id`.
    ///
    /// A job in a terminal status is returned unchanged. A job this worker
    /// already claimed is processed under its claim; a pending or queued job
    /// is claimed first.
    ///
    /// # Errors
    /// - `ScanError::NotFound` if the job does not exist
    /// - `ScanError::AlreadyClaimed` if another worker is running it
    /// - `ScanError::Database` on storage failure, including
    ///   `DatabaseError::ClaimLost` when the claim was taken over mid-run
    pub async fn process_scan_job(&self, job_id: &str, worker_id: &str) -> Result<ScanJob> {
        let job = scan_jobs::get_scan_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("scan job {job_id}")))?;

        if job.status.is_terminal() {
            tracing::debug!(job_id, status = %job.status, "scan job already finished");
            return Ok(job);
        }

        let job = if job.status == JobStatus::Running {
            if job.worker_id.as_deref() != Some(worker_id) {
                return Err(ScanError::AlreadyClaimed {
                    job_id: job.id,
                    owner: job.worker_id,
                });
            }
            job
        } else {
            match self.queue.claim(job_id, worker_id).await? {
                Some(claimed) => claimed,
                None => {
                    // Lost the race to another worker or a cancellation.
                    let current = scan_jobs::require_scan_job(&self.pool, job_id).await?;
                    if current.status.is_terminal() {
                        return Ok(current);
                    }
                    return Err(ScanError::AlreadyClaimed {
                        job_id: current.id,
                        owner: current.worker_id,
                    });
                }
            }
        };

        self.run_claimed(job).await
    }

    async fn run_claimed(&self, job: ScanJob) -> Result<ScanJob> {
        let epoch = job.claim_epoch;
        let discarded = scan_results::clear_for_job(&self.pool, &job.id, epoch).await?;
        if discarded > 0 {
            tracing::info!(job_id = %job.id, discarded, "discarded results of an earlier attempt");
        }

        // Rules and policies may change between jobs; read both fresh.
        self.scanner.clear_runtime_caches().await;
        let policies = DomainPolicySet::load(&self.pool).await?;
        let targets = scan_targets::get_by_scan_job(&self.pool, &job.id).await?;
        tracing::info!(job_id = %job.id, epoch, targets = targets.len(), "processing scan job");

        let mut counts = OutcomeCounts::default();
        let mut match_count: u32 = 0;

        for target in targets {
            let base = base_url(&target.normalized_url);
            let domain = base.as_deref().and_then(host_of).unwrap_or_default();

            let outcome = if !policies.is_allowed(&domain) {
                tracing::warn!(job_id = %job.id, domain = %domain, "target blocked by domain policy");
                TargetScan::rejected(
                    TargetStatus::Cancelled,
                    base.clone(),
                    ScanIssue::new(
                        "domain_policy_blocked",
                        "Target blocked by allowlist/denylist policy.",
                    ),
                )
            } else if self.circuit.is_open(&domain).await? {
                tracing::warn!(job_id = %job.id, domain = %domain, "target skipped, circuit open");
                TargetScan::rejected(
                    TargetStatus::Cancelled,
                    base.clone(),
                    ScanIssue::new("circuit_open", "Domain circuit breaker is open."),
                )
            } else {
                let scan = self
                    .scan_with_heartbeat(&job, &target.normalized_url)
                    .await?;
                if scan.status == TargetStatus::Failed {
                    self.circuit.record_failure(&domain).await?;
                } else {
                    self.circuit.record_success(&domain).await?;
                }
                scan
            };

            let stored = scan_results::record_result(
                &self.pool,
                &job.id,
                epoch,
                to_new_result(&target.id, outcome, base),
            )
            .await?;
            counts.record(stored.status);
            match_count += stored.match_count;
        }

        let status = aggregate_status(&counts);
        let finished =
            scan_jobs::finish_scan_job(&self.pool, &job.id, epoch, status, counts, match_count)
                .await?;
        tracing::info!(
            job_id = %finished.id,
            status = %finished.status,
            matches = finished.match_count,
            "scan job finished"
        );

        let payload = CompletionPayload {
            status: finished.status,
            summary: ScanSummary {
                completed: counts.completed,
                partial: counts.partial,
                failed: counts.failed,
                cancelled: counts.cancelled,
                matches: finished.match_count,
            },
        };
        if let Err(e) = self.notifier.notify_scan_completed(&finished.id, &payload).await {
            tracing::warn!(job_id = %finished.id, "completion notification failed: {}", e);
        }

        Ok(finished)
    }

    /// Crawl one target, touching the job every `heartbeat_interval` so stale
    /// recovery leaves it alone.
    async fn scan_with_heartbeat(&self, job: &ScanJob, url: &str) -> Result<TargetScan> {
        let scan = self.scanner.scan_target(url, &job.keywords, &job.options);
        tokio::pin!(scan);

        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut scan => return result,
                _ = heartbeat.tick() => {
                    scan_jobs::touch(&self.pool, &job.id, job.claim_epoch).await?;
                    tracing::trace!(job_id = %job.id, url, "heartbeat");
                }
            }
        }
    }

    /// Mark a job `failed` after its processing aborted.
    ///
    /// Returns `false` if `epoch` no longer owns the job.
    pub async fn mark_failed(&self, job_id: &str, epoch: i64, message: &str) -> Result<bool> {
        let marked = scan_jobs::mark_failed(&self.pool, job_id, epoch, message).await?;
        if marked {
            tracing::error!(job_id, epoch, "scan job failed: {}", message);
        }
        Ok(marked)
    }

    /// Load a job.
    pub async fn get_scan_job(&self, job_id: &str) -> Result<Option<ScanJob>> {
        Ok(scan_jobs::get_scan_job(&self.pool, job_id).await?)
    }

    /// Per-target results of a job with their matches, in target order.
    pub async fn get_scan_results(&self, job_id: &str) -> Result<Vec<ScanResult>> {
        Ok(scan_results::get_by_scan_job(&self.pool, job_id).await?)
    }

    /// Compare the unsuppressed matches of `job_id` with those of `baseline_id`.
    ///
    /// # Errors
    /// - `ScanError::NotFound` if either job does not exist
    /// - `ScanError::Validation` if either job has not finished
    pub async fn diff_against_baseline(&self, job_id: &str, baseline_id: &str) -> Result<BaselineDiff> {
        for id in [job_id, baseline_id] {
            let job = scan_jobs::get_scan_job(&self.pool, id)
                .await?
                .ok_or_else(|| ScanError::NotFound(format!("scan job {id}")))?;
            if !job.status.is_terminal() {
                return Err(ScanError::Validation(format!(
                    "Scan job {id} has not finished (status {}).",
                    job.status
                )));
            }
        }

        let current = scan_results::effective_matches(&self.pool, job_id).await?;
        let baseline = scan_results::effective_matches(&self.pool, baseline_id).await?;

        let current_keys: HashSet<&str> = current.iter().map(|m| m.signature.as_str()).collect();
        let baseline_keys: HashSet<&str> = baseline.iter().map(|m| m.signature.as_str()).collect();
        let unchanged_count = current_keys.intersection(&baseline_keys).count();

        let new = current
            .iter()
            .filter(|m| !baseline_keys.contains(m.signature.as_str()))
            .cloned()
            .collect();
        let resolved = baseline
            .iter()
            .filter(|m| !current_keys.contains(m.signature.as_str()))
            .cloned()
            .collect();

        Ok(BaselineDiff {
            scan_job_id: job_id.to_string(),
            baseline_scan_job_id: baseline_id.to_string(),
            new,
            resolved,
            unchanged_count,
        })
    }

    /// Diff a job against the baseline named in its options, if any.
    pub async fn diff_with_configured_baseline(&self, job_id: &str) -> Result<Option<BaselineDiff>> {
        let job = scan_jobs::get_scan_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("scan job {job_id}")))?;
        match job.options.baseline_scan_job_id {
            Some(baseline_id) => Ok(Some(self.diff_against_baseline(job_id, &baseline_id).await?)),
            None => Ok(None),
        }
    }
}

/// Split, normalize and deduplicate target entries, keeping the first
/// occurrence of each normalized URL.
fn normalize_targets(entries: &[String]) -> Vec<NewScanTarget> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .flat_map(|entry| entry.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let normalized = normalize_input(line)?;
            seen.insert(normalized.clone()).then(|| NewScanTarget {
                raw_input: line.to_string(),
                normalized_url: normalized,
            })
        })
        .collect()
}

fn dedup_trimmed(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

fn to_new_result(target_id: &str, scan: TargetScan, fallback_base: Option<String>) -> NewScanResult {
    let error_code = scan.errors.first().map(|issue| issue.code.clone());
    let error_message = (!scan.errors.is_empty()).then(|| {
        scan.errors
            .iter()
            .map(|issue| issue.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    });

    NewScanResult {
        scan_target_id: target_id.to_string(),
        status: scan.status,
        error_code,
        error_message,
        base_url: scan.base_url.or(fallback_base),
        fetch_details: scan.fetch_details,
        matches: scan
            .matches
            .into_iter()
            .map(|m| NewScanMatch {
                keyword: m.keyword,
                title: m.title,
                url: m.url,
                source: m.source.as_str().to_string(),
                severity: m.severity,
                is_suppressed: m.suppressed,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(completed: u32, partial: u32, failed: u32, cancelled: u32) -> OutcomeCounts {
        OutcomeCounts {
            completed,
            partial,
            failed,
            cancelled,
        }
    }

    #[test]
    fn test_aggregate_status() {
        assert_eq!(aggregate_status(&counts(2, 0, 1, 0)), JobStatus::Partial);
        assert_eq!(aggregate_status(&counts(0, 0, 3, 0)), JobStatus::Failed);
        assert_eq!(aggregate_status(&counts(0, 0, 0, 3)), JobStatus::Cancelled);
        assert_eq!(aggregate_status(&counts(3, 0, 0, 0)), JobStatus::Completed);
        assert_eq!(aggregate_status(&counts(0, 0, 1, 2)), JobStatus::Partial);
        assert_eq!(aggregate_status(&counts(1, 0, 0, 2)), JobStatus::Completed);
        assert_eq!(aggregate_status(&counts(1, 1, 0, 0)), JobStatus::Partial);
    }

    #[test]
    fn test_normalize_targets_splits_and_dedups() {
        let entries = vec![
            "example.com\nhttps://example.com/\n\n".to_string(),
            "  other.org ".to_string(),
            "ftp://files.example.net".to_string(),
        ];
        let targets = normalize_targets(&entries);
        let urls: Vec<&str> = targets.iter().map(|t| t.normalized_url.as_str()).collect();

        assert_eq!(urls.len(), 2);
        assert_eq!(targets[0].raw_input, "example.com");
        assert_eq!(targets[1].raw_input, "other.org");
    }

    #[test]
    fn test_dedup_trimmed_keeps_order() {
        let items = vec![
            " casino ".to_string(),
            "poker".to_string(),
            "casino".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(dedup_trimmed(items), vec!["casino", "poker"]);
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: CreateScanRequest = serde_json::from_str(
            r#"{"targets":["example.com"],"keywords":["slots"],"keywordMode":"regex","maxPages":20}"#,
        )
        .expect("deserialize");
        assert_eq!(request.keyword_mode, Some(KeywordMode::Regex));
        assert_eq!(request.max_pages, Some(20));
        assert!(request.exclude_keywords.is_empty());
    }
}
