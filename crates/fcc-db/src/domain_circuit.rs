//! Per-domain circuit breaker state.
//!
//! Counters are updated with single upsert statements so concurrent workers
//! never lose an increment.

use crate::codec;
use crate::error::Result;
use fcc_core::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

/// Failure history of one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    /// Lowercased host name
    pub domain: String,
    /// Consecutive failed targets
    pub failure_count: u32,
    /// Most recent failure
    pub last_failure_at: Option<Timestamp>,
    /// The domain is skipped until this moment
    pub open_until: Option<Timestamp>,
}

impl CircuitState {
    /// Whether the circuit short-circuits scans at `now`.
    #[must_use]
    pub fn is_open(&self, now: Timestamp) -> bool {
        self.open_until.is_some_and(|until| until > now)
    }
}

fn from_row(row: &SqliteRow) -> Result<CircuitState> {
    Ok(CircuitState {
        domain: row.try_get("domain")?,
        failure_count: codec::count(row, "failure_count")?,
        last_failure_at: codec::optional_timestamp(row, "last_failure_at")?,
        open_until: codec::optional_timestamp(row, "open_until")?,
    })
}

/// Get the state of a domain, if it has ever been recorded.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn get_state(pool: &Pool<Sqlite>, domain: &str) -> Result<Option<CircuitState>> {
    let row = sqlx::query(
        "SELECT domain, failure_count, last_failure_at, open_until FROM domain_circuit WHERE domain = ?",
    )
    .bind(domain)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(from_row).transpose()
}

/// Count a failure; open the circuit for `open_secs` once `threshold` is reached.
///
/// # Errors
/// Returns `DatabaseError` if the upsert fails.
pub async fn record_failure(
    pool: &Pool<Sqlite>,
    domain: &str,
    threshold: u32,
    open_secs: u64,
    now: Timestamp,
) -> Result<CircuitState> {
    let open_until = now
        .offset_secs(i64::try_from(open_secs).unwrap_or(i64::MAX / 2))
        .to_rfc3339();
    let now_str = now.to_rfc3339();

    let row = sqlx::query(
        "INSERT INTO domain_circuit (domain, failure_count, last_failure_at, open_until, updated_at)
         VALUES (?1, 1, ?2, CASE WHEN 1 >= ?3 THEN ?4 ELSE NULL END, ?2)
         ON CONFLICT(domain) DO UPDATE SET
             failure_count = domain_circuit.failure_count + 1,
             last_failure_at = ?2,
             open_until = CASE WHEN domain_circuit.failure_count + 1 >= ?3 THEN ?4 ELSE NULL END,
             updated_at = ?2
         RETURNING domain, failure_count, last_failure_at, open_until",
    )
    .bind(domain)
    .bind(&now_str)
    .bind(i64::from(threshold))
    .bind(&open_until)
    .fetch_one(pool)
    .await?;

    from_row(&row)
}

/// Reset a domain after a successful scan.
///
/// # Errors
/// Returns `DatabaseError` if the update fails.
pub async fn record_success(pool: &Pool<Sqlite>, domain: &str, now: Timestamp) -> Result<()> {
    sqlx::query(
        "UPDATE domain_circuit SET failure_count = 0, open_until = NULL, updated_at = ?
         WHERE domain = ?",
    )
    .bind(now.to_rfc3339())
    .bind(domain)
    .execute(pool)
    .await?;
    Ok(())
}
