//! Error types for the insulin_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for insulin_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A dose log line could not be parsed
    #[error("Dose log line {line}: {source}")]
    DoseRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A dose entry breaks its own invariants
    #[error("Validation error: {0}")]
    Validation(String),

    /// Reconciler input is not ascending by start date
    #[error("Ordering error: {0}")]
    Ordering(String),

    /// A second interval opened while one of the same kind was still open
    #[error("Overlap error: {0}")]
    Overlap(String),

    /// Invalid parameters or configuration values
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The basal schedule has no segment covering a dose
    #[error("Basal schedule does not cover {0}")]
    ScheduleCoverage(String),
}
