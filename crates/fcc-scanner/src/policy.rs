//! Allow/deny lists of target domains.

use crate::error::Result;
use fcc_db::domain_policies::{self, ListType};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;

/// Snapshot of the domain policy tables.
///
/// Built once per processing run; edits made while a job runs apply to the
/// next run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainPolicySet {
    allow: HashSet<String>,
    deny: HashSet<String>,
}

impl DomainPolicySet {
    /// Read the current allow and deny lists.
    pub async fn load(pool: &Pool<Sqlite>) -> Result<Self> {
        let mut set = Self::default();
        for policy in domain_policies::list_policies(pool).await? {
            set.insert(&policy.domain, policy.list_type);
        }
        Ok(set)
    }

    /// Add an entry to the snapshot.
    pub fn insert(&mut self, domain: &str, list_type: ListType) {
        let domain = domain.trim().to_lowercase();
        match list_type {
            ListType::Allow => self.allow.insert(domain),
            ListType::Deny => self.deny.insert(domain),
        };
    }

    /// Whether `domain` may be scanned.
    ///
    /// An empty domain never is. When any allow entry exists the domain must
    /// be one of them, and it must never be denied.
    #[must_use]
    pub fn is_allowed(&self, domain: &str) -> bool {
        if domain.is_empty() {
            return false;
        }
        let domain = domain.to_lowercase();
        if !self.allow.is_empty() && !self.allow.contains(&domain) {
            return false;
        }
        !self.deny.contains(&domain)
    }
}
