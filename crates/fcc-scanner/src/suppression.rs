//! Operator-managed suppression of matches.
//!
//! Active rules are read from storage once and cached for the lifetime of
//! the [`SuppressionService`]. The mutation methods here invalidate the cache
//! themselves; anything editing `suppression_rules` behind the service's back
//! must call [`SuppressionService::invalidate`].

use crate::error::{Result, ScanError};
use crate::matcher::compile_pattern;
use fcc_db::suppression_rules::{self, SuppressionRule};
use regex::Regex;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug)]
struct CompiledRule {
    scope: Option<String>,
    pattern: Regex,
}

/// Snapshot of the active rules, ready for matching.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<Vec<CompiledRule>>,
}

impl RuleSet {
    fn compile(rules: &[SuppressionRule]) -> Self {
        let compiled = rules
            .iter()
            .filter(|rule| rule.is_active && !rule.pattern.is_empty())
            .filter_map(|rule| match compile_pattern(&rule.pattern) {
                Ok(pattern) => Some(CompiledRule {
                    scope: rule.domain_scope.clone(),
                    pattern,
                }),
                Err(e) => {
                    tracing::warn!(rule_id = %rule.id, "skipping suppression rule with invalid pattern: {}", e);
                    None
                }
            })
            .collect();
        Self {
            rules: Arc::new(compiled),
        }
    }

    /// Whether any rule applicable to `domain` matches the title or URL.
    ///
    /// A rule applies when it has no scope or its scope equals `domain`
    /// ignoring case.
    #[must_use]
    pub fn is_suppressed(&self, title: &str, url: &str, domain: &str) -> bool {
        self.rules.iter().any(|rule| {
            rule.scope
                .as_deref()
                .is_none_or(|scope| scope.eq_ignore_ascii_case(domain))
                && (rule.pattern.is_match(title) || rule.pattern.is_match(url))
        })
    }

    /// Number of usable rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no usable rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Cached access to suppression rules.
#[derive(Debug, Clone)]
pub struct SuppressionService {
    pool: Pool<Sqlite>,
    cache: Arc<RwLock<Option<RuleSet>>>,
}

impl SuppressionService {
    /// Service over `pool` with an empty cache.
    #[must_use]
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Active rules, loaded on first use.
    pub async fn rules(&self) -> Result<RuleSet> {
        if let Some(rules) = self.cache.read().await.as_ref() {
            return Ok(rules.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(rules) = cache.as_ref() {
            return Ok(rules.clone());
        }
        let loaded = RuleSet::compile(&suppression_rules::list_active(&self.pool).await?);
        tracing::debug!(rules = loaded.len(), "loaded suppression rules");
        *cache = Some(loaded.clone());
        Ok(loaded)
    }

    /// Drop the cached rules so the next lookup reads storage again.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Whether a match with `title` and `url` found on `domain` is suppressed.
    pub async fn is_suppressed(&self, title: &str, url: &str, domain: &str) -> Result<bool> {
        Ok(self.rules().await?.is_suppressed(title, url, domain))
    }

    /// Add an active rule after checking that its pattern compiles.
    pub async fn add_rule(
        &self,
        name: &str,
        pattern: &str,
        domain_scope: Option<&str>,
    ) -> Result<SuppressionRule> {
        if pattern.trim().is_empty() {
            return Err(ScanError::Validation("suppression pattern must not be empty".to_string()));
        }
        compile_pattern(pattern).map_err(|e| ScanError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let rule = suppression_rules::create_rule(&self.pool, name, pattern, domain_scope).await?;
        self.invalidate().await;
        tracing::info!(rule_id = %rule.id, "suppression rule added");
        Ok(rule)
    }

    /// Activate or deactivate a rule.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        suppression_rules::set_active(&self.pool, id, active).await?;
        self.invalidate().await;
        Ok(())
    }

    /// Delete a rule. Returns whether it existed.
    pub async fn delete_rule(&self, id: &str) -> Result<bool> {
        let deleted = suppression_rules::delete_rule(&self.pool, id).await?;
        self.invalidate().await;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcc_db::Database;

    async fn setup() -> (Database, SuppressionService) {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");
        let service = SuppressionService::new(db.pool().clone());
        (db, service)
    }

    #[tokio::test]
    async fn test_unscoped_rule_applies_everywhere() {
        let (_db, service) = setup().await;
        service
            .add_rule("casino", "casino", None)
            .await
            .expect("add rule");

        for domain in ["example.com", "other.com"] {
            assert!(service
                .is_suppressed("Online Casino Bonus", "https://x/a", domain)
                .await
                .expect("check"));
        }
        assert!(!service
            .is_suppressed("Weather", "https://x/a", "example.com")
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn test_scoped_rule_only_applies_to_its_domain() {
        let (_db, service) = setup().await;
        service
            .add_rule("other only", "casino", Some("Other.com"))
            .await
            .expect("add rule");

        assert!(!service
            .is_suppressed("Online Casino Bonus", "https://example.com/x", "example.com")
            .await
            .expect("check"));
        assert!(service
            .is_suppressed("Online Casino Bonus", "https://other.com/x", "OTHER.com")
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn test_pattern_matches_url() {
        let (_db, service) = setup().await;
        service
            .add_rule("affiliate", r"/go/\d+", None)
            .await
            .expect("add rule");
        assert!(service
            .is_suppressed("Partner", "https://example.com/go/42", "example.com")
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn test_cache_requires_invalidation_for_external_edits() {
        let (db, service) = setup().await;
        assert!(service.rules().await.expect("rules").is_empty());

        fcc_db::suppression_rules::create_rule(db.pool(), "direct", "casino", None)
            .await
            .expect("create rule directly");
        assert!(service.rules().await.expect("rules").is_empty());

        service.invalidate().await;
        assert_eq!(service.rules().await.expect("rules").len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_invalidate_cache() {
        let (_db, service) = setup().await;
        let rule = service
            .add_rule("casino", "casino", None)
            .await
            .expect("add rule");
        assert_eq!(service.rules().await.expect("rules").len(), 1);

        service.set_active(&rule.id, false).await.expect("deactivate");
        assert!(service.rules().await.expect("rules").is_empty());

        service.set_active(&rule.id, true).await.expect("activate");
        assert_eq!(service.rules().await.expect("rules").len(), 1);

        assert!(service.delete_rule(&rule.id).await.expect("delete"));
        assert!(service.rules().await.expect("rules").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_patterns() {
        let (db, service) = setup().await;
        let err = service
            .add_rule("broken", "(casino", None)
            .await
            .expect_err("invalid pattern rejected");
        assert!(matches!(err, ScanError::InvalidPattern { .. }));

        fcc_db::suppression_rules::create_rule(db.pool(), "legacy", "(casino", None)
            .await
            .expect("store legacy rule");
        service.invalidate().await;
        assert!(service.rules().await.expect("rules").is_empty());
    }
}
