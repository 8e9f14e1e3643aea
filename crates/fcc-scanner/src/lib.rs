//! FCC Scanner - forbidden content discovery and scan orchestration.
//!
//! This crate crawls target sites for anchors matching operator keywords and
//! coordinates whole scan jobs on top of the `fcc-db` storage layer.
//!
//! # Features
//!
//! - URL canonicalization and link resolution
//! - SSRF guard with DNS pinning for every fetch, including redirect hops
//! - Bounded retry with exponential backoff and jitter
//! - Site search, JSON search API and front-page strategies tried in order
//! - Severity scoring and operator suppression rules
//! - Domain allow/deny policies and a shared per-domain circuit breaker
//! - Baseline diffs between jobs and webhook completion notifications
//!
//! # Example
//!
//! ```rust,ignore
//! use fcc_scanner::{CreateScanRequest, ScanOrchestrator};
//!
//! let orchestrator = ScanOrchestrator::from_config(db.pool().clone(), &config)?;
//! let job = orchestrator
//!     .create_scan_job("user-1", CreateScanRequest {
//!         targets: vec!["example.com".to_string()],
//!         keywords: Some(vec!["casino".to_string()]),
//!         ..CreateScanRequest::default()
//!     })
//!     .await?;
//! let finished = orchestrator.process_scan_job(&job.id, "worker-1").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod circuit;
pub mod error;
pub mod fetch;
pub mod matcher;
pub mod normalizer;
pub mod notify;
pub mod orchestrator;
pub mod parser;
pub mod policy;
pub mod scanner;
pub mod scorer;
pub mod ssrf;
pub mod strategy;
pub mod suppression;

// Re-export commonly used types
pub use circuit::CircuitBreaker;
pub use error::{Result, ScanError};
pub use fetch::{FetchFailure, FetchPipeline, FetchResponse, Fetcher, RetryPolicy, Transport};
pub use matcher::KeywordMatcher;
pub use normalizer::{base_url, host_of, normalize_input, resolve_url};
pub use notify::{CompletionPayload, LogNotifier, NotifyError, ScanNotifier, ScanSummary, WebhookNotifier};
pub use orchestrator::{aggregate_status, BaselineDiff, CreateScanRequest, ScanOrchestrator};
pub use policy::DomainPolicySet;
pub use scanner::{Scanner, TargetScan};
pub use ssrf::{HostResolver, SsrfError, SsrfGuard};
pub use strategy::{FoundMatch, Strategy};
pub use suppression::{RuleSet, SuppressionService};
