//! Shared types used across the checker.
//!
//! This module defines the job and target state enums, the closed keyword
//! mode, the bounds-clamped scan options and the per-fetch diagnostics that
//! both the storage layer and the scanner exchange.

use crate::error::CoreError;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Lifecycle state of a scan job.
///
/// `pending -> queued -> running -> {completed | partial | failed | cancelled}`.
/// The last four are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Persisted but not yet handed to the queue
    Pending,
    /// Waiting for a worker to claim it
    Queued,
    /// Claimed by a worker
    Running,
    /// Every target completed
    Completed,
    /// Some targets failed while others succeeded or were blocked
    Partial,
    /// Every target failed
    Failed,
    /// Cancelled before being claimed, or every target was blocked
    Cancelled,
}

impl JobStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    /// Returns `CoreError::Decode` for an unknown status string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::Decode(format!("unknown job status '{other}'"))),
        }
    }

    /// Whether the job can no longer change state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Partial | Self::Failed | Self::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of scanning a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    /// No fetch errors occurred
    Completed,
    /// Fetch errors occurred but matches survived
    Partial,
    /// Fetch errors occurred and no match survived
    Failed,
    /// Short-circuited by domain policy or an open circuit
    Cancelled,
}

impl TargetStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    /// Returns `CoreError::Decode` for an unknown status string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::Decode(format!("unknown target status '{other}'"))),
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How anchor text is compared against a keyword.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordMode {
    /// Case-insensitive substring
    #[default]
    Contains,
    /// Trimmed, case-insensitive equality
    Exact,
    /// Case-insensitive, Unicode-aware regular expression
    Regex,
}

impl KeywordMode {
    /// Fold the legacy `exact_match` flag into a mode.
    ///
    /// `regex` wins over the flag; the flag upgrades `contains` to `exact`.
    #[must_use]
    pub fn resolve(requested: Option<Self>, exact_match: bool) -> Self {
        match requested.unwrap_or_default() {
            Self::Regex => Self::Regex,
            Self::Contains if exact_match => Self::Exact,
            other => other,
        }
    }
}

impl fmt::Display for KeywordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains => f.write_str("contains"),
            Self::Exact => f.write_str("exact"),
            Self::Regex => f.write_str("regex"),
        }
    }
}

/// Validated per-job scan options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Anchor text matching mode
    pub keyword_mode: KeywordMode,
    /// Site-search pages followed per keyword
    pub max_pages: u32,
    /// Matches kept per keyword and strategy
    pub max_results_per_keyword: u32,
    /// Job to diff against once this one finishes
    #[serde(default)]
    pub baseline_scan_job_id: Option<String>,
    /// Scan profile that contributed keywords
    #[serde(default)]
    pub scan_profile_id: Option<String>,
    /// Keyword set that contributed keywords
    #[serde(default)]
    pub keyword_set_id: Option<String>,
}

impl ScanOptions {
    /// Allowed range for `max_pages`.
    pub const MAX_PAGES_RANGE: RangeInclusive<u32> = 1..=10;
    /// Allowed range for `max_results_per_keyword`.
    pub const MAX_RESULTS_RANGE: RangeInclusive<u32> = 1..=50;
    /// `max_pages` when the caller gives none.
    pub const DEFAULT_MAX_PAGES: u32 = 3;
    /// `max_results_per_keyword` when the caller gives none.
    pub const DEFAULT_MAX_RESULTS: u32 = 5;

    /// Build options with page and result caps clamped to their safe ranges.
    #[must_use]
    pub fn clamped(
        keyword_mode: KeywordMode,
        max_pages: Option<u32>,
        max_results_per_keyword: Option<u32>,
    ) -> Self {
        Self {
            keyword_mode,
            max_pages: clamp_to(
                max_pages.unwrap_or(Self::DEFAULT_MAX_PAGES),
                &Self::MAX_PAGES_RANGE,
            ),
            max_results_per_keyword: clamp_to(
                max_results_per_keyword.unwrap_or(Self::DEFAULT_MAX_RESULTS),
                &Self::MAX_RESULTS_RANGE,
            ),
            baseline_scan_job_id: None,
            scan_profile_id: None,
            keyword_set_id: None,
        }
    }

    /// Whether anchors must equal the keyword.
    #[must_use]
    pub fn exact_match(&self) -> bool {
        self.keyword_mode == KeywordMode::Exact
    }

    /// Whether keywords are regular expressions.
    #[must_use]
    pub fn regex_mode(&self) -> bool {
        self.keyword_mode == KeywordMode::Regex
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::clamped(KeywordMode::default(), None, None)
    }
}

fn clamp_to(value: u32, range: &RangeInclusive<u32>) -> u32 {
    value.clamp(*range.start(), *range.end())
}

/// Diagnostics for one fetch attempt chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchDetail {
    /// URL that was requested
    pub url: String,
    /// Final HTTP status (0 when no response was received)
    pub http_status: u16,
    /// Response content type, if any
    pub content_type: Option<String>,
    /// Error tag and message, if the fetch failed
    pub error: Option<String>,
}

/// A coded, human-readable problem recorded against a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    /// Machine-readable code, e.g. `fetch_failed`
    pub code: String,
    /// Human-readable detail
    pub message: String,
}

impl ScanIssue {
    /// Create an issue from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling.
///
/// The string form is fixed-width (microseconds, `Z` suffix) so stored
/// timestamps compare correctly as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Create a timestamp from a `DateTime<Utc>`, truncated to the stored
    /// microsecond precision.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(6))
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Parse a timestamp from an RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, CoreError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self::from_datetime(dt.with_timezone(&Utc)))
            .map_err(|e| CoreError::Decode(format!("invalid timestamp '{s}': {e}")))
    }

    /// Format as a fixed-width RFC3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// This timestamp shifted by `seconds` (negative moves into the past).
    #[must_use]
    pub fn offset_secs(&self, seconds: i64) -> Self {
        Self::from_datetime(self.0 + chrono::Duration::seconds(seconds))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_status_round_trip_and_terminal() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Partial,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).expect("parse"), status);
        }
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Partial.is_terminal());
        assert!(JobStatus::parse("InProgress").is_err());
    }

    #[test]
    fn test_keyword_mode_resolution() {
        assert_eq!(KeywordMode::resolve(None, false), KeywordMode::Contains);
        assert_eq!(KeywordMode::resolve(None, true), KeywordMode::Exact);
        assert_eq!(
            KeywordMode::resolve(Some(KeywordMode::Regex), true),
            KeywordMode::Regex
        );
        assert_eq!(
            KeywordMode::resolve(Some(KeywordMode::Exact), false),
            KeywordMode::Exact
        );
    }

    #[test]
    fn test_keyword_mode_serialization() {
        let json = serde_json::to_string(&KeywordMode::Regex).expect("serialize mode");
        assert_eq!(json, "\"regex\"");
        let mode: KeywordMode = serde_json::from_str("\"exact\"").expect("deserialize mode");
        assert_eq!(mode, KeywordMode::Exact);
    }

    #[test]
    fn test_scan_options_clamping() {
        let options = ScanOptions::clamped(KeywordMode::Contains, Some(0), Some(500));
        assert_eq!(options.max_pages, 1);
        assert_eq!(options.max_results_per_keyword, 50);

        let defaults = ScanOptions::default();
        assert_eq!(defaults.max_pages, 3);
        assert_eq!(defaults.max_results_per_keyword, 5);
        assert!(!defaults.exact_match());
        assert!(!defaults.regex_mode());
    }

    #[test]
    fn test_fetch_detail_camel_case() {
        let detail = FetchDetail {
            url: "https://example.com/?s=casino".to_string(),
            http_status: 200,
            content_type: Some("text/html".to_string()),
            error: None,
        };
        let json = serde_json::to_string(&detail).expect("serialize detail");
        assert!(json.contains("\"httpStatus\":200"));
        assert!(json.contains("\"contentType\":\"text/html\""));
    }

    #[test]
    fn test_timestamp_fixed_width() {
        let early = Timestamp::from_datetime(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap());
        let later = early.offset_secs(1);
        assert_eq!(early.to_rfc3339(), "2026-01-02T03:04:05.000000Z");
        assert!(early.to_rfc3339() < later.to_rfc3339());

        let parsed = Timestamp::from_rfc3339(&later.to_rfc3339()).expect("parse timestamp");
        assert_eq!(parsed, later);
    }
}
