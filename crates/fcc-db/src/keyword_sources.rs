//! Stored keyword sources: scan profiles and keyword sets.

use crate::codec;
use crate::error::{DatabaseError, Result};
use fcc_core::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};

/// A named, reusable keyword list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProfile {
    /// Unique identifier for this profile
    pub id: String,
    /// Human-readable label
    pub name: String,
    /// Keywords in scan order
    pub keywords: Vec<String>,
    /// Creation time
    pub created_at: Timestamp,
}

/// A keyword set whose terms are grouped into inclusions and exclusions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSet {
    /// Unique identifier for this set
    pub id: String,
    /// Human-readable label
    pub name: String,
    /// Terms added to a job's keywords
    pub include_terms: Vec<String>,
    /// Terms removed from a job's keywords
    pub exclude_terms: Vec<String>,
    /// Creation time
    pub created_at: Timestamp,
}

/// Store a scan profile.
///
/// # Errors
/// Returns `DatabaseError` if the insert fails.
pub async fn create_profile(
    pool: &Pool<Sqlite>,
    name: &str,
    keywords: Vec<String>,
) -> Result<ScanProfile> {
    let id = codec::new_id();
    let now = Timestamp::now();

    sqlx::query("INSERT INTO scan_profiles (id, name, keywords_json, created_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(serde_json::to_string(&keywords)?)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;

    Ok(ScanProfile {
        id,
        name: name.to_string(),
        keywords,
        created_at: now,
    })
}

/// Get a scan profile by ID.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or the keyword list is corrupt.
pub async fn get_profile(pool: &Pool<Sqlite>, id: &str) -> Result<Option<ScanProfile>> {
    let row = sqlx::query("SELECT id, name, keywords_json, created_at FROM scan_profiles WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(r) => Ok(Some(ScanProfile {
            id: r.try_get("id")?,
            name: r.try_get("name")?,
            keywords: codec::json(&r, "keywords_json")?,
            created_at: codec::timestamp(&r, "created_at")?,
        })),
        None => Ok(None),
    }
}

/// Store a keyword set with its terms.
///
/// # Errors
/// Returns `DatabaseError` if any insert fails; nothing is written in that case.
pub async fn create_keyword_set(
    pool: &Pool<Sqlite>,
    name: &str,
    include_terms: Vec<String>,
    exclude_terms: Vec<String>,
) -> Result<KeywordSet> {
    let id = codec::new_id();
    let now = Timestamp::now();

    let mut tx = pool.begin().await?;
    sqlx::query("INSERT INTO keyword_sets (id, name, created_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

    let terms = include_terms
        .iter()
        .map(|t| (t, "include"))
        .chain(exclude_terms.iter().map(|t| (t, "exclude")));
    for (position, (term, term_type)) in (0i64..).zip(terms) {
        sqlx::query(
            "INSERT INTO keyword_terms (id, keyword_set_id, position, term, term_type)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(codec::new_id())
        .bind(&id)
        .bind(position)
        .bind(term)
        .bind(term_type)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(KeywordSet {
        id,
        name: name.to_string(),
        include_terms,
        exclude_terms,
        created_at: now,
    })
}

/// Get a keyword set by ID with its terms in stored order.
///
/// # Errors
/// Returns `DatabaseError` if a query fails or a term has an unknown type.
pub async fn get_keyword_set(pool: &Pool<Sqlite>, id: &str) -> Result<Option<KeywordSet>> {
    let Some(row) = sqlx::query("SELECT id, name, created_at FROM keyword_sets WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let term_rows = sqlx::query(
        "SELECT term, term_type FROM keyword_terms WHERE keyword_set_id = ? ORDER BY position",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut include_terms = Vec::new();
    let mut exclude_terms = Vec::new();
    for term_row in &term_rows {
        let term: String = term_row.try_get("term")?;
        let term_type: String = term_row.try_get("term_type")?;
        match term_type.as_str() {
            "include" => include_terms.push(term),
            "exclude" => exclude_terms.push(term),
            other => {
                return Err(DatabaseError::Decode(format!(
                    "unknown keyword term type '{other}'"
                )))
            }
        }
    }

    Ok(Some(KeywordSet {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        include_terms,
        exclude_terms,
        created_at: codec::timestamp(&row, "created_at")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_profile_round_trip() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");

        let profile = create_profile(db.pool(), "gambling", words(&["casino", "slots"]))
            .await
            .expect("create profile");
        let loaded = get_profile(db.pool(), &profile.id)
            .await
            .expect("load profile")
            .expect("profile exists");
        assert_eq!(loaded, profile);
        assert!(get_profile(db.pool(), "missing").await.expect("query").is_none());
    }

    #[tokio::test]
    async fn test_keyword_set_groups_terms() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");

        let set = create_keyword_set(
            db.pool(),
            "betting",
            words(&["bet", "odds", "wager"]),
            words(&["odds"]),
        )
        .await
        .expect("create keyword set");

        let loaded = get_keyword_set(db.pool(), &set.id)
            .await
            .expect("load set")
            .expect("set exists");
        assert_eq!(loaded.include_terms, words(&["bet", "odds", "wager"]));
        assert_eq!(loaded.exclude_terms, words(&["odds"]));
    }
}
