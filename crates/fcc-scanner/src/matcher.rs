//! Keyword matching against anchor text and titles.

use crate::error::{Result, ScanError};
use fcc_core::KeywordMode;
use regex::{Regex, RegexBuilder};

/// A keyword prepared once for repeated matching.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keyword: String,
    kind: MatchKind,
}

#[derive(Debug, Clone)]
enum MatchKind {
    Contains(String),
    Exact(String),
    Pattern(Regex),
}

/// Compile a case-insensitive, Unicode-aware regex.
pub(crate) fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .unicode(true)
        .build()
}

impl KeywordMatcher {
    /// Prepare `keyword` for `mode`.
    ///
    /// # Errors
    /// Returns `ScanError::InvalidKeyword` when a regex keyword does not compile.
    pub fn new(keyword: &str, mode: KeywordMode) -> Result<Self> {
        let kind = match mode {
            KeywordMode::Contains => MatchKind::Contains(keyword.to_lowercase()),
            KeywordMode::Exact => MatchKind::Exact(keyword.trim().to_lowercase()),
            KeywordMode::Regex => {
                MatchKind::Pattern(compile_pattern(keyword).map_err(|e| {
                    ScanError::InvalidKeyword {
                        keyword: keyword.to_string(),
                        reason: e.to_string(),
                    }
                })?)
            }
        };
        Ok(Self {
            keyword: keyword.to_string(),
            kind,
        })
    }

    /// The keyword as given.
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Whether `text` matches.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        match &self.kind {
            MatchKind::Contains(needle) => text.to_lowercase().contains(needle.as_str()),
            MatchKind::Exact(expected) => text.trim().to_lowercase() == *expected,
            MatchKind::Pattern(regex) => regex.is_match(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_case_insensitive() {
        let matcher = KeywordMatcher::new("Casino", KeywordMode::Contains).expect("matcher");
        assert!(matcher.is_match("Best CASINO bonuses"));
        assert!(!matcher.is_match("Cassino"));
    }

    #[test]
    fn test_exact_requires_whole_text() {
        let matcher = KeywordMatcher::new(" Online Casino ", KeywordMode::Exact).expect("matcher");
        assert!(matcher.is_match("online casino"));
        assert!(matcher.is_match("  ONLINE CASINO\n"));
        assert!(!matcher.is_match("online casino bonus"));
    }

    #[test]
    fn test_regex_is_case_insensitive_and_unicode() {
        let matcher = KeywordMatcher::new(r"b[eé]t\w*", KeywordMode::Regex).expect("matcher");
        assert!(matcher.is_match("Live BETTING"));
        assert!(matcher.is_match("Bét365"));
        assert!(!matcher.is_match("Bat"));

        let turkish = KeywordMatcher::new("şans", KeywordMode::Regex).expect("matcher");
        assert!(turkish.is_match("ŞANS OYUNLARI"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let err = KeywordMatcher::new("(unclosed", KeywordMode::Regex).expect_err("must fail");
        assert!(matches!(err, ScanError::InvalidKeyword { .. }));
    }
}
