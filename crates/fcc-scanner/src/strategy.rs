//! Content discovery strategies.
//!
//! For each keyword the scanner walks [`Strategy::ORDER`] and stops at the
//! first strategy that finds anything.

use crate::fetch::{FetchResponse, Fetcher};
use crate::matcher::KeywordMatcher;
use crate::normalizer::resolve_url;
use crate::parser::ParsedPage;
use crate::scorer;
use fcc_core::{FetchDetail, ScanIssue};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Query values are encoded like path segments: only unreserved characters
/// stay bare.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Where a match was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// The site's own search page, paginated
    #[serde(rename = "wordpress_search")]
    SiteSearch,
    /// The JSON search endpoint
    #[serde(rename = "wordpress_rest")]
    SearchApi,
    /// Anchors on the target's front page
    #[serde(rename = "generic_html")]
    Generic,
}

impl Strategy {
    /// Priority order.
    pub const ORDER: [Self; 3] = [Self::SiteSearch, Self::SearchApi, Self::Generic];

    /// Source tag stored with each match.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SiteSearch => "wordpress_search",
            Self::SearchApi => "wordpress_rest",
            Self::Generic => "generic_html",
        }
    }

    /// Find matches for `matcher` on the target behind `run`.
    pub(crate) async fn run(self, run: &mut TargetRun<'_>, matcher: &KeywordMatcher) -> Vec<FoundMatch> {
        match self {
            Self::SiteSearch => site_search(run, matcher).await,
            Self::SearchApi => search_api(run, matcher).await,
            Self::Generic => generic(run, matcher).await,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keyword hit on a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundMatch {
    /// Keyword that matched
    pub keyword: String,
    /// Anchor text or result title
    pub title: String,
    /// Absolute, normalized link
    pub url: String,
    /// Strategy that found it
    pub source: Strategy,
    /// Score in `0..=100`
    pub severity: u8,
    /// Hidden by a suppression rule
    pub suppressed: bool,
}

/// Per-target crawl state shared by the strategies.
pub(crate) struct TargetRun<'a> {
    fetcher: &'a dyn Fetcher,
    base_url: &'a str,
    max_pages: usize,
    max_results: usize,
    regex_mode: bool,
    pub(crate) fetch_details: Vec<FetchDetail>,
    pub(crate) errors: Vec<ScanIssue>,
}

impl<'a> TargetRun<'a> {
    pub(crate) fn new(
        fetcher: &'a dyn Fetcher,
        base_url: &'a str,
        max_pages: u32,
        max_results: u32,
        regex_mode: bool,
    ) -> Self {
        Self {
            fetcher,
            base_url,
            max_pages: usize::try_from(max_pages).unwrap_or(usize::MAX),
            max_results: usize::try_from(max_results).unwrap_or(usize::MAX),
            regex_mode,
            fetch_details: Vec::new(),
            errors: Vec::new(),
        }
    }

    async fn fetch(&mut self, url: &str) -> FetchResponse {
        let response = self.fetcher.fetch(url).await;
        self.fetch_details.push(FetchDetail {
            url: url.to_string(),
            http_status: response.status,
            content_type: response.content_type.clone(),
            error: response.error.as_ref().map(ToString::to_string),
        });
        response
    }

    fn issue(&mut self, code: &str, message: String) {
        tracing::debug!(base_url = self.base_url, code, "{}", message);
        self.errors.push(ScanIssue::new(code, message));
    }

    fn found(&self, matcher: &KeywordMatcher, title: &str, url: String, source: Strategy) -> FoundMatch {
        FoundMatch {
            keyword: matcher.keyword().to_string(),
            title: title.to_string(),
            severity: scorer::score(matcher.keyword(), title, &url, self.regex_mode),
            url,
            source,
            suppressed: false,
        }
    }

    /// Matching anchors of `page`, resolved against `page_url`, unique by
    /// URL and capped.
    fn extract(
        &self,
        page: &ParsedPage,
        page_url: &str,
        matcher: &KeywordMatcher,
        source: Strategy,
    ) -> Vec<FoundMatch> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for anchor in &page.anchors {
            if !matcher.is_match(&anchor.text) {
                continue;
            }
            let Some(url) = resolve_url(page_url, &anchor.href) else {
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }
            found.push(self.found(matcher, &anchor.text, url, source));
            if found.len() >= self.max_results {
                break;
            }
        }
        found
    }
}

fn encode(keyword: &str) -> String {
    utf8_percent_encode(keyword, QUERY_VALUE).to_string()
}

async fn site_search(run: &mut TargetRun<'_>, matcher: &KeywordMatcher) -> Vec<FoundMatch> {
    let mut found: Vec<FoundMatch> = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(format!("{}/?s={}", run.base_url, encode(matcher.keyword())));
    let mut pages = 0;

    while let Some(url) = next.take() {
        if pages >= run.max_pages || !visited.insert(url.clone()) {
            break;
        }

        let response = run.fetch(&url).await;
        if let Some(failure) = &response.error {
            run.issue("fetch_failed", format!("Fetch failed for: {url} ({failure})"));
            break;
        }
        if !response.is_html() {
            run.issue(
                "invalid_content_type",
                format!("Expected HTML content type for: {url}"),
            );
            break;
        }

        let page = ParsedPage::parse(&response.body);
        for hit in run.extract(&page, &response.url, matcher, Strategy::SiteSearch) {
            if !found.iter().any(|existing| existing.url == hit.url) {
                found.push(hit);
            }
        }
        if found.len() >= run.max_results {
            break;
        }

        next = page
            .next_links
            .iter()
            .find_map(|link| resolve_url(&response.url, link));
        pages += 1;
    }

    found.truncate(run.max_results);
    found
}

async fn search_api(run: &mut TargetRun<'_>, matcher: &KeywordMatcher) -> Vec<FoundMatch> {
    let url = format!(
        "{}/wp-json/wp/v2/search?search={}&per_page={}",
        run.base_url,
        encode(matcher.keyword()),
        run.max_results
    );
    let response = run.fetch(&url).await;
    if !response.is_success() || !response.is_json() {
        return Vec::new();
    }

    let items = match serde_json::from_str::<serde_json::Value>(&response.body) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(serde_json::Value::Object(fields)) => fields.into_iter().map(|(_, v)| v).collect(),
        Ok(_) | Err(_) => {
            run.issue(
                "invalid_json",
                "Invalid JSON from WordPress REST endpoint.".to_string(),
            );
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for item in &items {
        let field = |name: &str| item.get(name).and_then(serde_json::Value::as_str).map(str::trim);
        let (Some(title), Some(link)) = (field("title"), field("url")) else {
            continue;
        };
        if title.is_empty() || link.is_empty() || !matcher.is_match(title) {
            continue;
        }
        let Some(url) = resolve_url(run.base_url, link) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        found.push(run.found(matcher, title, url, Strategy::SearchApi));
        if found.len() >= run.max_results {
            break;
        }
    }
    found
}

async fn generic(run: &mut TargetRun<'_>, matcher: &KeywordMatcher) -> Vec<FoundMatch> {
    let base_url = run.base_url;
    let response = run.fetch(base_url).await;
    if !response.is_success() {
        return Vec::new();
    }
    if !response.is_html() {
        run.issue(
            "invalid_content_type",
            "Fallback scan received non-HTML content.".to_string(),
        );
        return Vec::new();
    }

    let page = ParsedPage::parse(&response.body);
    run.extract(&page, &response.url, matcher, Strategy::Generic)
}
