//! Per-target crawl and match extraction.

use crate::error::Result;
use crate::fetch::Fetcher;
use crate::matcher::KeywordMatcher;
use crate::normalizer::{base_url, host_of, normalize_input};
use crate::strategy::{FoundMatch, Strategy, TargetRun};
use crate::suppression::SuppressionService;
use fcc_core::{FetchDetail, ScanIssue, ScanOptions, TargetStatus};
use fcc_db::scan_results::match_signature;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything learned about one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetScan {
    /// Outcome
    pub status: TargetStatus,
    /// `scheme://host[:port]` of the target, when it could be derived
    pub base_url: Option<String>,
    /// Matches unique by keyword and URL, suppressed ones flagged
    pub matches: Vec<FoundMatch>,
    /// Problems encountered, in order
    pub errors: Vec<ScanIssue>,
    /// Every fetch made, in order
    pub fetch_details: Vec<FetchDetail>,
}

impl TargetScan {
    /// A target rejected without any network access.
    #[must_use]
    pub fn rejected(status: TargetStatus, base_url: Option<String>, issue: ScanIssue) -> Self {
        Self {
            status,
            base_url,
            matches: Vec::new(),
            errors: vec![issue],
            fetch_details: Vec::new(),
        }
    }

    /// Matches not hidden by a suppression rule.
    pub fn effective_matches(&self) -> impl Iterator<Item = &FoundMatch> {
        self.matches.iter().filter(|m| !m.suppressed)
    }
}

/// Crawls a target with each keyword and collects scored matches.
#[derive(Clone)]
pub struct Scanner {
    fetcher: Arc<dyn Fetcher>,
    suppression: SuppressionService,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("suppression", &self.suppression)
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// Scanner fetching through `fetcher` and filtering through `suppression`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, suppression: SuppressionService) -> Self {
        Self {
            fetcher,
            suppression,
        }
    }

    /// The suppression service used to flag matches.
    #[must_use]
    pub fn suppression(&self) -> &SuppressionService {
        &self.suppression
    }

    /// Forget cached suppression rules.
    pub async fn clear_runtime_caches(&self) {
        self.suppression.invalidate().await;
    }

    /// Scan `target` for `keywords`.
    ///
    /// Keywords are processed in order; blank ones are skipped. Fetch
    /// problems are recorded on the returned value rather than raised.
    ///
    /// # Errors
    /// Returns `ScanError::Database` if suppression rules cannot be loaded.
    pub async fn scan_target(
        &self,
        target: &str,
        keywords: &[String],
        options: &ScanOptions,
    ) -> Result<TargetScan> {
        let Some(normalized) = normalize_input(target) else {
            return Ok(TargetScan::rejected(
                TargetStatus::Failed,
                None,
                ScanIssue::new("invalid_target", "Invalid target URL or domain."),
            ));
        };
        let Some(base) = base_url(&normalized) else {
            return Ok(TargetScan::rejected(
                TargetStatus::Failed,
                None,
                ScanIssue::new("invalid_base_url", "Unable to determine base URL."),
            ));
        };

        let mut run = TargetRun::new(
            self.fetcher.as_ref(),
            &base,
            options.max_pages,
            options.max_results_per_keyword,
            options.regex_mode(),
        );

        let mut matches: Vec<FoundMatch> = Vec::new();
        let mut by_signature: HashMap<String, usize> = HashMap::new();

        for keyword in keywords.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
            let matcher = match KeywordMatcher::new(keyword, options.keyword_mode) {
                Ok(matcher) => matcher,
                Err(e) => {
                    run.errors.push(ScanIssue::new("invalid_keyword", e.to_string()));
                    continue;
                }
            };

            let mut found = Vec::new();
            for strategy in Strategy::ORDER {
                found = strategy.run(&mut run, &matcher).await;
                if !found.is_empty() {
                    break;
                }
            }

            // The last hit for a signature wins but keeps the first position.
            for hit in found {
                let signature = match_signature(&hit.keyword, &hit.url);
                match by_signature.get(&signature) {
                    Some(&index) => matches[index] = hit,
                    None => {
                        by_signature.insert(signature, matches.len());
                        matches.push(hit);
                    }
                }
            }
        }

        let rules = self.suppression.rules().await?;
        let domain = host_of(&base).unwrap_or_default();
        for hit in &mut matches {
            hit.suppressed = rules.is_suppressed(&hit.title, &hit.url, &domain);
        }

        let errors = run.errors;
        let effective = matches.iter().filter(|m| !m.suppressed).count();
        let status = match (errors.is_empty(), effective) {
            (true, _) => TargetStatus::Completed,
            (false, n) if n > 0 => TargetStatus::Partial,
            (false, _) => TargetStatus::Failed,
        };

        tracing::debug!(
            input = target,
            %status,
            matches = matches.len(),
            effective,
            fetches = run.fetch_details.len(),
            "target scanned"
        );

        Ok(TargetScan {
            status,
            base_url: Some(base.clone()),
            matches,
            errors,
            fetch_details: run.fetch_details,
        })
    }
}
