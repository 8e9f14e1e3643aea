//! Scripted web used by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use fcc_scanner::{host_of, FetchFailure, FetchResponse, Fetcher};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct Page {
    status: u16,
    content_type: Option<String>,
    body: String,
}

/// In-memory sites keyed by exact URL. Unknown URLs answer an empty HTML 404;
/// hosts taken down answer 503.
#[derive(Default)]
pub struct FakeWeb {
    pages: Mutex<HashMap<String, Page>>,
    down: Mutex<HashSet<String>>,
    requests: Mutex<Vec<String>>,
}

impl FakeWeb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, status: u16, content_type: Option<&str>, body: &str) {
        self.pages.lock().unwrap().insert(
            url.to_string(),
            Page {
                status,
                content_type: content_type.map(str::to_string),
                body: body.to_string(),
            },
        );
    }

    pub fn html(&self, url: &str, body: &str) {
        self.respond(url, 200, Some("text/html; charset=UTF-8"), body);
    }

    pub fn json(&self, url: &str, body: &str) {
        self.respond(url, 200, Some("application/json"), body);
    }

    pub fn take_down(&self, host: &str) {
        self.down.lock().unwrap().insert(host.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, host: &str) -> usize {
        self.requests()
            .iter()
            .filter(|url| host_of(url).as_deref() == Some(host))
            .count()
    }
}

#[async_trait]
impl Fetcher for FakeWeb {
    async fn fetch(&self, url: &str) -> FetchResponse {
        self.requests.lock().unwrap().push(url.to_string());

        let host = host_of(url).unwrap_or_default();
        if self.down.lock().unwrap().contains(&host) {
            return FetchResponse {
                url: url.to_string(),
                status: 503,
                content_type: Some("text/html".to_string()),
                location: None,
                body: String::new(),
                error: Some(FetchFailure::Status(503)),
            };
        }

        let page = self.pages.lock().unwrap().get(url).cloned().unwrap_or(Page {
            status: 404,
            content_type: Some("text/html".to_string()),
            body: String::new(),
        });
        FetchResponse {
            url: url.to_string(),
            status: page.status,
            content_type: page.content_type,
            location: None,
            body: page.body,
            error: None,
        }
    }
}

/// Search results page listing `links` as `(href, text)` anchors.
pub fn search_page(links: &[(&str, &str)]) -> String {
    let anchors: String = links
        .iter()
        .map(|(href, text)| format!(r#"<li><a href="{href}">{text}</a></li>"#))
        .collect();
    format!("<html><body><ul>{anchors}</ul></body></html>")
}
