//! Error types for the churn training framework

use thiserror::Error;

/// Result type alias for churn-automl operations
pub type Result<T> = std::result::Result<T, ChurnError>;

/// Main error type for the framework
#[derive(Error, Debug)]
pub enum ChurnError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Tracking error: {0}")]
    TrackingError(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<polars::error::PolarsError> for ChurnError {
    fn from(err: polars::error::PolarsError) -> Self {
        ChurnError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for ChurnError {
    fn from(err: serde_json::Error) -> Self {
        ChurnError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ChurnError {
    fn from(err: ndarray::ShapeError) -> Self {
        ChurnError::ShapeError {
            expected: "well-formed array".to_string(),
            actual: err.to_string(),
        }
    }
}
