//! Operator-managed suppression rules.
//!
//! Pattern validity is not checked here; the scanner's suppression service
//! skips rules whose pattern does not compile.

use crate::codec;
use crate::error::{DatabaseError, Result};
use fcc_core::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

/// A rule that marks matching results as non-actionable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionRule {
    /// Unique identifier for this rule
    pub id: String,
    /// Human-readable label
    pub name: String,
    /// Regular expression matched against a result's title and URL
    pub pattern: String,
    /// Restrict the rule to one domain; `None` applies everywhere
    pub domain_scope: Option<String>,
    /// Inactive rules are kept but ignored
    pub is_active: bool,
    /// Creation time
    pub created_at: Timestamp,
    /// Last modification time
    pub updated_at: Timestamp,
}

const RULE_COLUMNS: &str =
    "id, name, pattern, domain_scope, is_active, created_at, updated_at";

fn from_row(row: &SqliteRow) -> Result<SuppressionRule> {
    Ok(SuppressionRule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        pattern: row.try_get("pattern")?,
        domain_scope: row.try_get("domain_scope")?,
        is_active: codec::flag(row, "is_active")?,
        created_at: codec::timestamp(row, "created_at")?,
        updated_at: codec::timestamp(row, "updated_at")?,
    })
}

/// Create an active rule. A blank scope is stored as "no scope".
///
/// # Errors
/// Returns `DatabaseError` if the insert fails.
pub async fn create_rule(
    pool: &Pool<Sqlite>,
    name: &str,
    pattern: &str,
    domain_scope: Option<&str>,
) -> Result<SuppressionRule> {
    let id = codec::new_id();
    let now = Timestamp::now();
    let domain_scope = domain_scope
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    sqlx::query(
        "INSERT INTO suppression_rules (id, name, pattern, domain_scope, is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(pattern)
    .bind(&domain_scope)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(SuppressionRule {
        id,
        name: name.to_string(),
        pattern: pattern.to_string(),
        domain_scope,
        is_active: true,
        created_at: now,
        updated_at: now,
    })
}

/// Get all active rules, oldest first.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn list_active(pool: &Pool<Sqlite>) -> Result<Vec<SuppressionRule>> {
    let sql = format!(
        "SELECT {RULE_COLUMNS} FROM suppression_rules WHERE is_active = 1 ORDER BY created_at, rowid"
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

/// Get every rule, active or not, oldest first.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn list_all(pool: &Pool<Sqlite>) -> Result<Vec<SuppressionRule>> {
    let sql = format!("SELECT {RULE_COLUMNS} FROM suppression_rules ORDER BY created_at, rowid");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

/// Activate or deactivate a rule.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` for an unknown rule.
pub async fn set_active(pool: &Pool<Sqlite>, id: &str, active: bool) -> Result<()> {
    let result =
        sqlx::query("UPDATE suppression_rules SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(i64::from(active))
            .bind(Timestamp::now().to_rfc3339())
            .bind(id)
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Suppression rule '{id}' not found"
        )));
    }
    Ok(())
}

/// Delete a rule. Returns whether a rule was removed.
///
/// # Errors
/// Returns `DatabaseError` if the delete fails.
pub async fn delete_rule(pool: &Pool<Sqlite>, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM suppression_rules WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
