//! Match severity scoring.

use regex::Regex;
use std::sync::LazyLock;

/// Terms that raise the severity of any match whose title or URL mentions them.
static SECONDARY_RISK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)casino|bet|gambl|slot|poker|adult|pharma|crypto")
        .expect("secondary risk vocabulary is a valid regex")
});

const BASE_SCORE: i32 = 40;
const TITLE_BONUS: i32 = 30;
const URL_BONUS: i32 = 15;
const REGEX_BONUS: i32 = 10;
const RISK_BONUS: i32 = 5;

/// Score a match in `0..=100`.
///
/// Starts at 40 and adds 30 when the keyword appears in the title, 15 when it
/// appears in the URL, 10 for regex mode and 5 when the title or URL mentions
/// a secondary-risk term. Keyword lookups are case-insensitive substring
/// checks, also in regex mode.
#[must_use]
pub fn score(keyword: &str, title: &str, url: &str, regex_mode: bool) -> u8 {
    let needle = keyword.to_lowercase();
    let mut total = BASE_SCORE;

    if title.to_lowercase().contains(&needle) {
        total += TITLE_BONUS;
    }
    if url.to_lowercase().contains(&needle) {
        total += URL_BONUS;
    }
    if regex_mode {
        total += REGEX_BONUS;
    }
    if SECONDARY_RISK.is_match(&format!("{title} {url}")) {
        total += RISK_BONUS;
    }

    u8::try_from(total.clamp(0, 100)).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevant_match_outscores_unrelated_one() {
        let strong = score("casino", "Best Casino Tips", "https://x.com/casino-guide", false);
        let weak = score("casino", "Random Article", "https://x.com/news", false);
        assert!(strong > weak);
        assert_eq!(strong, 90);
        assert_eq!(weak, 40);
    }

    #[test]
    fn test_bonuses() {
        assert_eq!(score("bonus", "Bonus page", "https://x.com/", false), 70);
        assert_eq!(score("bonus", "Other", "https://x.com/bonus", false), 55);
        assert_eq!(score("bon.s", "Other", "https://x.com/", true), 50);
        assert_eq!(score("zzz", "Poker night", "https://x.com/", false), 45);
    }

    #[test]
    fn test_bounded() {
        let max = score("casino", "Casino", "https://casino.example/casino", true);
        assert_eq!(max, 100);
        assert!(score("", "", "", false) <= 100);
    }
}
