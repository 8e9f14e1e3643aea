//! SSRF-safe HTTP fetching.
//!
//! Three layers, each built on the one below:
//!
//! - [`FetchPipeline::fetch_raw`]: one request to an address vetted by the
//!   [`SsrfGuard`], redirects not followed
//! - [`FetchPipeline::fetch_with_redirects`]: follows up to `max_redirects`
//!   3xx hops, revalidating every `Location` before following it
//! - [`FetchPipeline::fetch_with_retry`]: retries failures with exponential
//!   backoff plus jitter
//!
//! Failures are values on [`FetchResponse`], never `Err`, so callers can
//! record them as diagnostics.

use crate::normalizer::resolve_url;
use crate::ssrf::{ResolvedTarget, SsrfError, SsrfGuard};
use async_trait::async_trait;
use fcc_core::ScannerConfig;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE, LOCATION};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a fetch did not produce a usable response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The URL was rejected before any connection was made.
    #[error("SSRF_BLOCK: {0}")]
    Blocked(SsrfError),

    /// A redirect pointed somewhere the guard rejects.
    #[error("SSRF_BLOCK_REDIRECT: {0}")]
    BlockedRedirect(SsrfError),

    /// Connection, TLS, timeout or body read failure.
    #[error("TRANSPORT: {0}")]
    Transport(String),

    /// The server answered with a 5xx status.
    #[error("HTTP_{0}")]
    Status(u16),

    /// The redirect chain was longer than allowed.
    #[error("Too many redirects.")]
    TooManyRedirects,
}

impl FetchFailure {
    /// Whether trying again could plausibly succeed.
    ///
    /// Policy rejections are final; DNS failures, transport errors and 5xx
    /// responses are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Blocked(SsrfError::Resolution { .. })
            | Self::Transport(_)
            | Self::Status(_) => true,
            Self::Blocked(_) | Self::BlockedRedirect(_) | Self::TooManyRedirects => false,
        }
    }
}

/// What a transport returns for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// `Content-Type` header
    pub content_type: Option<String>,
    /// `Location` header
    pub location: Option<String>,
    /// Body, lossily decoded and capped
    pub body: String,
}

/// Outcome of a fetch, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// URL of the last request made
    pub url: String,
    /// HTTP status, 0 when no response was received
    pub status: u16,
    /// `Content-Type` header
    pub content_type: Option<String>,
    /// `Location` header
    pub location: Option<String>,
    /// Response body
    pub body: String,
    /// Set when the fetch failed
    pub error: Option<FetchFailure>,
}

impl FetchResponse {
    fn failed(url: &str, failure: FetchFailure) -> Self {
        Self {
            url: url.to_string(),
            status: 0,
            content_type: None,
            location: None,
            body: String::new(),
            error: Some(failure),
        }
    }

    fn from_raw(url: &str, raw: RawResponse) -> Self {
        let error = (raw.status == 0 || raw.status >= 500).then_some(FetchFailure::Status(raw.status));
        Self {
            url: url.to_string(),
            status: raw.status,
            content_type: raw.content_type,
            location: raw.location,
            body: raw.body,
            error,
        }
    }

    /// A response with a status in `1..500` and no transport failure.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the content type is HTML. A missing content type counts as HTML.
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type.as_deref().is_none_or(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.trim().is_empty() || ct.contains("text/html") || ct.contains("application/xhtml+xml")
        })
    }

    /// Whether the content type is JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
    }
}

/// Sends a single request to a vetted address.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Request `url`, connecting to `target` instead of resolving the host
    /// again.
    async fn send(&self, url: &str, target: &ResolvedTarget) -> std::result::Result<RawResponse, String>;
}

/// [`Transport`] backed by `reqwest` with rustls.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    timeout: Duration,
    connect_timeout: Duration,
    user_agent: String,
    max_body_bytes: usize,
}

impl ReqwestTransport {
    /// Transport using the scanner timeouts, user agent and body cap.
    #[must_use]
    pub fn from_config(config: &ScannerConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        Self {
            timeout,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs.max(1)).min(timeout),
            user_agent: config.user_agent.clone(),
            max_body_bytes: config.max_body_bytes,
        }
    }

    fn client(&self, target: &ResolvedTarget) -> reqwest::Result<reqwest::Client> {
        // Pin the host to the vetted address. Redirects are handled by the
        // pipeline so that every hop is validated.
        reqwest::Client::builder()
            .resolve(&target.host, target.socket_addr())
            .redirect(reqwest::redirect::Policy::none())
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.clone())
            .build()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, url: &str, target: &ResolvedTarget) -> std::result::Result<RawResponse, String> {
        let client = self.client(target).map_err(|e| e.to_string())?;
        let mut response = client.get(url).send().await.map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let content_type = header_value(response.headers(), &CONTENT_TYPE);
        let location = header_value(response.headers(), &LOCATION);

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            let room = self.max_body_bytes.saturating_sub(body.len());
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                tracing::debug!(url, limit = self.max_body_bytes, "response body truncated");
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(RawResponse {
            status,
            content_type,
            location,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Backoff schedule for [`FetchPipeline::fetch_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Multiplied by `2^attempt`
    pub base_delay: Duration,
    /// Upper bound of the uniform random jitter added to each delay
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Policy from the scanner configuration.
    #[must_use]
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_jitter: Duration::from_millis(config.retry_max_jitter_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        self.backoff(attempt) + jitter
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ScannerConfig::default())
    }
}

/// Something that fetches a URL with retries and redirect handling.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, returning the final response or the last failure.
    async fn fetch(&self, url: &str) -> FetchResponse;
}

/// The guarded, redirect-aware, retrying fetcher.
#[derive(Clone)]
pub struct FetchPipeline {
    guard: SsrfGuard,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    max_redirects: u32,
}

impl std::fmt::Debug for FetchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPipeline")
            .field("guard", &self.guard)
            .field("retry", &self.retry)
            .field("max_redirects", &self.max_redirects)
            .finish_non_exhaustive()
    }
}

impl FetchPipeline {
    /// Assemble a pipeline from its parts.
    #[must_use]
    pub fn new(
        guard: SsrfGuard,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        max_redirects: u32,
    ) -> Self {
        Self {
            guard,
            transport,
            retry,
            max_redirects,
        }
    }

    /// Production pipeline: system resolver and `reqwest` transport.
    #[must_use]
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new(
            SsrfGuard::new(config.allow_private_network),
            Arc::new(ReqwestTransport::from_config(config)),
            RetryPolicy::from_config(config),
            config.max_redirects,
        )
    }

    /// One request, no redirects followed.
    pub async fn fetch_raw(&self, url: &str) -> FetchResponse {
        let target = match self.guard.validate_and_resolve(url).await {
            Ok(target) => target,
            Err(e) => return FetchResponse::failed(url, FetchFailure::Blocked(e)),
        };

        match self.transport.send(url, &target).await {
            Ok(raw) => {
                tracing::debug!(url, status = raw.status, "fetched");
                FetchResponse::from_raw(url, raw)
            }
            Err(e) => FetchResponse::failed(url, FetchFailure::Transport(e)),
        }
    }

    /// Follow 3xx responses, validating each hop.
    ///
    /// Responses without a usable `Location` are returned as they are, as
    /// are 4xx responses.
    pub async fn fetch_with_redirects(&self, url: &str) -> FetchResponse {
        let mut current = url.to_string();
        let mut redirects = 0;

        while redirects <= self.max_redirects {
            let response = self.fetch_raw(&current).await;
            if response.status == 0 || !(300..400).contains(&response.status) {
                return response;
            }

            let next = response
                .location
                .as_deref()
                .map(str::trim)
                .filter(|location| !location.is_empty())
                .and_then(|location| resolve_url(&current, location));
            let Some(next) = next else {
                return response;
            };

            if let Err(e) = self.guard.validate_and_resolve(&next).await {
                tracing::warn!(from = %current, to = %next, "redirect blocked");
                return FetchResponse::failed(&current, FetchFailure::BlockedRedirect(e));
            }

            tracing::debug!(from = %current, to = %next, "following redirect");
            current = next;
            redirects += 1;
        }

        FetchResponse::failed(&current, FetchFailure::TooManyRedirects)
    }

    /// [`Self::fetch_with_redirects`], retried on retryable failures.
    pub async fn fetch_with_retry(&self, url: &str) -> FetchResponse {
        let mut attempt = 0;
        loop {
            let response = self.fetch_with_redirects(url).await;
            let Some(failure) = &response.error else {
                return response;
            };

            attempt += 1;
            if attempt > self.retry.max_retries || !failure.is_retryable() {
                return response;
            }

            let delay = self.retry.delay(attempt);
            tracing::warn!(
                url,
                attempt,
                max_retries = self.retry.max_retries,
                "fetch failed ({}), retrying in {:?}",
                failure,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Fetcher for FetchPipeline {
    async fn fetch(&self, url: &str) -> FetchResponse {
        self.fetch_with_retry(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssrf::HostResolver;
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::sync::Mutex;

    struct PublicResolver;

    #[async_trait]
    impl HostResolver for PublicResolver {
        async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
            let ip = if host.starts_with("internal") {
                "10.0.0.7"
            } else {
                "93.184.216.34"
            };
            Ok(vec![ip.parse().expect("ip")])
        }
    }

    /// Replies from a script keyed by URL; each URL's replies are consumed
    /// in order and the last one repeats.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<HashMap<String, Vec<std::result::Result<RawResponse, String>>>>,
        calls: Mutex<Vec<(String, IpAddr)>>,
    }

    impl ScriptedTransport {
        fn reply(&self, url: &str, reply: std::result::Result<RawResponse, String>) {
            self.script
                .lock()
                .expect("lock")
                .entry(url.to_string())
                .or_default()
                .push(reply);
        }

        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .expect("lock")
                .iter()
                .map(|(url, _)| url.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, url: &str, target: &ResolvedTarget) -> std::result::Result<RawResponse, String> {
            self.calls
                .lock()
                .expect("lock")
                .push((url.to_string(), target.ip));
            let mut script = self.script.lock().expect("lock");
            let replies = script
                .get_mut(url)
                .ok_or_else(|| format!("unscripted url {url}"))?;
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0].clone()
            }
        }
    }

    fn html(status: u16, body: &str) -> std::result::Result<RawResponse, String> {
        Ok(RawResponse {
            status,
            content_type: Some("text/html; charset=utf-8".to_string()),
            location: None,
            body: body.to_string(),
        })
    }

    fn redirect(to: &str) -> std::result::Result<RawResponse, String> {
        Ok(RawResponse {
            status: 301,
            content_type: None,
            location: Some(to.to_string()),
            body: String::new(),
        })
    }

    fn pipeline(transport: Arc<ScriptedTransport>) -> FetchPipeline {
        FetchPipeline::new(
            SsrfGuard::with_resolver(Arc::new(PublicResolver), false),
            transport,
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(150),
                max_jitter: Duration::from_millis(120),
            },
            5,
        )
    }

    #[tokio::test]
    async fn test_fetch_raw_pins_resolved_address() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply("https://site.example/", html(200, "<html></html>"));

        let response = pipeline(transport.clone()).fetch_raw("https://site.example/").await;
        assert!(response.is_success());
        assert!(response.is_html());

        let calls = transport.calls.lock().expect("lock").clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "93.184.216.34".parse::<IpAddr>().expect("ip"));
    }

    #[tokio::test]
    async fn test_fetch_raw_blocks_private_without_connecting() {
        let transport = Arc::new(ScriptedTransport::default());
        let response = pipeline(transport.clone()).fetch_raw("http://127.0.0.1/").await;

        assert_eq!(response.status, 0);
        assert!(matches!(response.error, Some(FetchFailure::Blocked(_))));
        assert!(response.error.expect("error").to_string().starts_with("SSRF_BLOCK: "));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_status_classification() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply("https://site.example/missing", html(404, "nope"));
        transport.reply("https://site.example/broken", html(503, "down"));
        let pipeline = pipeline(transport);

        let missing = pipeline.fetch_raw("https://site.example/missing").await;
        assert!(missing.is_success());
        assert_eq!(missing.status, 404);

        let broken = pipeline.fetch_raw("https://site.example/broken").await;
        assert!(!broken.is_success());
        assert_eq!(broken.error, Some(FetchFailure::Status(503)));
        assert_eq!(broken.body, "down");
    }

    #[tokio::test]
    async fn test_follows_relative_redirects() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply("https://site.example/old", redirect("/new"));
        transport.reply("https://site.example/new", html(200, "moved"));

        let response = pipeline(transport.clone())
            .fetch_with_redirects("https://site.example/old")
            .await;
        assert!(response.is_success());
        assert_eq!(response.url, "https://site.example/new");
        assert_eq!(response.body, "moved");
        assert_eq!(
            transport.calls(),
            vec!["https://site.example/old", "https://site.example/new"]
        );
    }

    #[tokio::test]
    async fn test_redirect_to_private_address_is_blocked() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply("https://site.example/", redirect("http://internal.example/admin"));

        let response = pipeline(transport.clone())
            .fetch_with_redirects("https://site.example/")
            .await;
        assert_eq!(response.status, 0);
        assert!(matches!(response.error, Some(FetchFailure::BlockedRedirect(_))));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply("https://site.example/a", redirect("/b"));
        transport.reply("https://site.example/b", redirect("/a"));

        let response = pipeline(transport.clone())
            .fetch_with_redirects("https://site.example/a")
            .await;
        assert_eq!(response.error, Some(FetchFailure::TooManyRedirects));
        assert_eq!(transport.calls().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_errors_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply("https://site.example/", html(502, ""));
        transport.reply("https://site.example/", html(200, "ok"));

        let response = pipeline(transport.clone())
            .fetch_with_retry("https://site.example/")
            .await;
        assert!(response.is_success());
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply("https://site.example/", Err("connection reset".to_string()));

        let response = pipeline(transport.clone())
            .fetch_with_retry("https://site.example/")
            .await;
        assert_eq!(
            response.error,
            Some(FetchFailure::Transport("connection reset".to_string()))
        );
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_blocks_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::default());
        let response = pipeline(transport.clone())
            .fetch_with_retry("http://10.0.0.5/")
            .await;
        assert!(matches!(response.error, Some(FetchFailure::Blocked(_))));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(300));
        assert_eq!(policy.backoff(2), Duration::from_millis(600));
        for attempt in 1..=3 {
            let delay = policy.delay(attempt);
            assert!(delay >= policy.backoff(attempt));
            assert!(delay <= policy.backoff(attempt) + Duration::from_millis(120));
        }
    }

    #[test]
    fn test_content_type_checks() {
        let mut response = FetchResponse::from_raw(
            "https://site.example/",
            RawResponse {
                status: 200,
                ..RawResponse::default()
            },
        );
        assert!(response.is_html());
        response.content_type = Some("application/xhtml+xml".to_string());
        assert!(response.is_html());
        response.content_type = Some("application/json; charset=UTF-8".to_string());
        assert!(!response.is_html());
        assert!(response.is_json());
    }

    #[test]
    fn test_reqwest_transport_builds_pinned_client() {
        let transport = ReqwestTransport::from_config(&ScannerConfig::default());
        let target = ResolvedTarget {
            host: "site.example".to_string(),
            port: 443,
            ip: "93.184.216.34".parse().expect("ip"),
        };
        assert!(transport.client(&target).is_ok());
    }
}
