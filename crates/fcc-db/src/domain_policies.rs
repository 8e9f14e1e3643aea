//! Allow and deny lists of target domains.

use crate::codec;
use crate::error::{DatabaseError, Result};
use fcc_core::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::fmt;

/// Which list a domain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    /// Only listed domains may be scanned (when the list is non-empty)
    Allow,
    /// Listed domains are never scanned
    Deny,
}

impl ListType {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    /// Returns `DatabaseError::Decode` for anything but `allow` or `deny`.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(DatabaseError::Decode(format!("unknown list type '{other}'"))),
        }
    }
}

impl fmt::Display for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One allow or deny entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicy {
    /// Unique identifier for this entry
    pub id: String,
    /// Lowercased host name
    pub domain: String,
    /// List the domain belongs to
    pub list_type: ListType,
    /// Creation time
    pub created_at: Timestamp,
}

fn from_row(row: &SqliteRow) -> Result<DomainPolicy> {
    let list_type: String = row.try_get("list_type")?;
    Ok(DomainPolicy {
        id: row.try_get("id")?,
        domain: row.try_get("domain")?,
        list_type: ListType::parse(&list_type)?,
        created_at: codec::timestamp(row, "created_at")?,
    })
}

/// Add a domain to a list. Adding an existing entry returns it unchanged.
///
/// # Errors
/// Returns `DatabaseError` if the domain is blank or the write fails.
pub async fn add_policy(
    pool: &Pool<Sqlite>,
    domain: &str,
    list_type: ListType,
) -> Result<DomainPolicy> {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        return Err(DatabaseError::Decode("domain must not be empty".to_string()));
    }

    sqlx::query(
        "INSERT INTO domain_policies (id, domain, list_type, created_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(domain, list_type) DO NOTHING",
    )
    .bind(codec::new_id())
    .bind(&domain)
    .bind(list_type.as_str())
    .bind(Timestamp::now().to_rfc3339())
    .execute(pool)
    .await?;

    let row = sqlx::query(
        "SELECT id, domain, list_type, created_at FROM domain_policies
         WHERE domain = ? AND list_type = ?",
    )
    .bind(&domain)
    .bind(list_type.as_str())
    .fetch_one(pool)
    .await?;

    from_row(&row)
}

/// Remove a domain from a list. Returns whether an entry was removed.
///
/// # Errors
/// Returns `DatabaseError` if the delete fails.
pub async fn remove_policy(pool: &Pool<Sqlite>, domain: &str, list_type: ListType) -> Result<bool> {
    let result = sqlx::query("DELETE FROM domain_policies WHERE domain = ? AND list_type = ?")
        .bind(domain.trim().to_lowercase())
        .bind(list_type.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Get every policy entry.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn list_policies(pool: &Pool<Sqlite>) -> Result<Vec<DomainPolicy>> {
    let rows = sqlx::query(
        "SELECT id, domain, list_type, created_at FROM domain_policies ORDER BY list_type, domain",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_add_is_idempotent_and_normalized() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");

        let first = add_policy(db.pool(), " Example.COM ", ListType::Deny)
            .await
            .expect("add policy");
        let second = add_policy(db.pool(), "example.com", ListType::Deny)
            .await
            .expect("add policy again");

        assert_eq!(first.id, second.id);
        assert_eq!(first.domain, "example.com");
        assert_eq!(list_policies(db.pool()).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_remove_policy() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");

        add_policy(db.pool(), "example.com", ListType::Allow)
            .await
            .expect("add policy");
        assert!(!remove_policy(db.pool(), "example.com", ListType::Deny)
            .await
            .expect("remove"));
        assert!(remove_policy(db.pool(), "EXAMPLE.com", ListType::Allow)
            .await
            .expect("remove"));
        assert!(list_policies(db.pool()).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_blank_domain_rejected() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");

        assert!(add_policy(db.pool(), "  ", ListType::Allow).await.is_err());
    }
}
