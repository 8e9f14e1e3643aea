use fcc_db::DatabaseError;
use thiserror::Error;

/// Errors raised by the scanner and the scan orchestrator.
///
/// Per-target transport problems are not errors here; they are recorded on
/// the target's result. These variants abort an operation as a whole.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A scan request was rejected before anything was stored.
    #[error("Invalid scan request: {0}")]
    Validation(String),

    /// A regex keyword does not compile.
    #[error("Invalid regex keyword '{keyword}': {reason}")]
    InvalidKeyword {
        /// Keyword as supplied
        keyword: String,
        /// Compiler message
        reason: String,
    },

    /// A referenced job, profile or keyword set does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The job is running under another worker's claim.
    #[error("Scan job {job_id} is owned by another worker")]
    AlreadyClaimed {
        /// Job identifier
        job_id: String,
        /// Worker holding the claim, if recorded
        owner: Option<String>,
    },

    /// A suppression rule pattern does not compile.
    #[error("Invalid suppression pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Pattern as supplied
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// Storage failure, including a lost claim.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The completion notifier could not be set up.
    #[error("Notifier error: {0}")]
    Notify(#[from] crate::notify::NotifyError),
}

/// Result alias for scanner operations.
pub type Result<T> = std::result::Result<T, ScanError>;
