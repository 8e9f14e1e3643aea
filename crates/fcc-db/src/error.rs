//! Database error types.
//!
//! Provides comprehensive error handling for database operations using `thiserror`.

use thiserror::Error;

/// Database-specific errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open or create database connection.
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Database record with provided identifier not found.
    #[error("{0}")]
    NotFoundWithMessage(String),

    /// Failed to decode database value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The job was reclaimed by another worker; this owner may no longer write.
    #[error("claim on scan job {job_id} lost (epoch {epoch} is no longer current)")]
    ClaimLost {
        /// Job whose claim was lost
        job_id: String,
        /// Epoch held by the stale owner
        epoch: i64,
    },

    /// Underlying `SQLx` error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl From<fcc_core::CoreError> for DatabaseError {
    fn from(err: fcc_core::CoreError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_lost_display() {
        let err = DatabaseError::ClaimLost {
            job_id: "job-1".to_string(),
            epoch: 2,
        };
        assert_eq!(
            err.to_string(),
            "claim on scan job job-1 lost (epoch 2 is no longer current)"
        );
    }

    #[test]
    fn test_core_decode_error_maps_to_decode() {
        let core = fcc_core::JobStatus::parse("sleeping").expect_err("unknown status");
        let err: DatabaseError = core.into();
        assert!(matches!(err, DatabaseError::Decode(msg) if msg.contains("sleeping")));
    }
}
