//! FCC Core - Foundation crate for the forbidden content checker.
//!
//! This crate provides the types, error handling and configuration shared by
//! the storage layer, the scanner and the worker binary.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths and `FCC_*` overrides
//! - [`types`] - Job and target statuses, keyword modes, clamped scan options,
//!   fetch diagnostics and timestamps
//!
//! # Example
//!
//! ```rust
//! use fcc_core::{KeywordMode, ScanOptions};
//!
//! let options = ScanOptions::clamped(KeywordMode::Contains, Some(40), Some(0));
//! assert_eq!(options.max_pages, 10);
//! assert_eq!(options.max_results_per_keyword, 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, CircuitConfig, DatabaseConfig, NotificationConfig, QueueConfig, ScannerConfig,
};
pub use error::{ConfigError, ConfigResult, CoreError, Result};
pub use types::{
    FetchDetail, JobStatus, KeywordMode, ScanIssue, ScanOptions, TargetStatus, Timestamp,
};
