//! Per-domain circuit breaker.
//!
//! State lives in the shared `domain_circuit` table so every worker sees the
//! same circuits. Each failure is a single atomic upsert.

use crate::error::Result;
use fcc_core::{CircuitConfig, Timestamp};
use fcc_db::domain_circuit::{self, CircuitState};
use sqlx::{Pool, Sqlite};

/// Opens a domain's circuit after repeated failed scans.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pool: Pool<Sqlite>,
    failure_threshold: u32,
    open_secs: u64,
}

impl CircuitBreaker {
    /// Breaker over `pool` with the configured threshold and open window.
    #[must_use]
    pub fn new(pool: Pool<Sqlite>, config: &CircuitConfig) -> Self {
        Self {
            pool,
            failure_threshold: config.failure_threshold.max(1),
            open_secs: config.open_secs,
        }
    }

    /// Whether scans of `domain` must be skipped right now.
    ///
    /// An empty domain never has an open circuit.
    pub async fn is_open(&self, domain: &str) -> Result<bool> {
        if domain.is_empty() {
            return Ok(false);
        }
        let state = domain_circuit::get_state(&self.pool, &domain.to_lowercase()).await?;
        Ok(state.is_some_and(|s| s.is_open(Timestamp::now())))
    }

    /// Count a failed scan of `domain`, opening the circuit at the threshold.
    pub async fn record_failure(&self, domain: &str) -> Result<Option<CircuitState>> {
        if domain.is_empty() {
            return Ok(None);
        }
        let state = domain_circuit::record_failure(
            &self.pool,
            &domain.to_lowercase(),
            self.failure_threshold,
            self.open_secs,
            Timestamp::now(),
        )
        .await?;

        if state.failure_count == self.failure_threshold {
            tracing::warn!(
                domain,
                failures = state.failure_count,
                open_secs = self.open_secs,
                "circuit opened"
            );
        }
        Ok(Some(state))
    }

    /// Reset `domain` after a successful scan.
    pub async fn record_success(&self, domain: &str) -> Result<()> {
        if domain.is_empty() {
            return Ok(());
        }
        domain_circuit::record_success(&self.pool, &domain.to_lowercase(), Timestamp::now()).await?;
        Ok(())
    }
}
