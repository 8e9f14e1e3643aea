//! HTML extraction for the crawl strategies.
//!
//! Pages are parsed into owned [`ParsedPage`] values so no DOM is held
//! across an await point.

use scraper::{Html, Selector};
use std::sync::LazyLock;

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector is valid"));

/// "Next page" selectors, most specific first.
static NEXT_PAGE: LazyLock<[Selector; 3]> = LazyLock::new(|| {
    ["a[rel~=next][href]", "a.next[href]", "link[rel~=next][href]"]
        .map(|css| Selector::parse(css).expect("next-page selector is valid"))
});

/// A link with visible text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// Trimmed text content
    pub text: String,
    /// Trimmed, unresolved `href`
    pub href: String,
}

/// What the scanner needs from one HTML document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    /// Anchors with non-empty text and `href`, in document order
    pub anchors: Vec<Anchor>,
    /// Candidate next-page links, in preference order
    pub next_links: Vec<String>,
}

impl ParsedPage {
    /// Parse `html`. Malformed markup is parsed leniently.
    #[must_use]
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);

        let anchors = document
            .select(&ANCHORS)
            .filter_map(|element| {
                let href = element.value().attr("href")?.trim();
                let text = element.text().collect::<String>();
                let text = text.trim();
                (!href.is_empty() && !text.is_empty()).then(|| Anchor {
                    text: text.to_string(),
                    href: href.to_string(),
                })
            })
            .collect();

        let next_links = NEXT_PAGE
            .iter()
            .filter_map(|selector| {
                document
                    .select(selector)
                    .next()
                    .and_then(|element| element.value().attr("href"))
                    .map(str::trim)
                    .filter(|href| !href.is_empty())
                    .map(str::to_string)
            })
            .collect();

        Self {
            anchors,
            next_links,
        }
    }
}
