//! Error types for the parasitism-glmm library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum GlmmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid observation at row {row}: {reason}")]
    Validation { row: usize, reason: String },

    #[error("Missing column '{0}' in input table")]
    MissingColumn(String),

    #[error("Formula parse error: {0}")]
    FormulaParse(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Model failed to converge: {0}")]
    Convergence(String),

    #[error("Not estimable: {0}")]
    NotEstimable(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GlmmError {
    /// Shorthand for a row-level validation failure.
    pub fn validation(row: usize, reason: impl Into<String>) -> Self {
        GlmmError::Validation {
            row,
            reason: reason.into(),
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, GlmmError>;
