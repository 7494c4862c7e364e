//! Error types for the tabular pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type shared by the data service, model adapters and ML service
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file format: {0}. Use CSV, TSV, JSON, or Parquet.")]
    UnsupportedFormat(String),

    #[error("Columns not found in data: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("No rows left after dropping rows with a missing target")]
    EmptyDataset,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown model type: {0}")]
    UnknownAlgorithm(String),

    #[error("Invalid parameters for {algorithm}: {reason}")]
    InvalidParams { algorithm: String, reason: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(err: polars::error::PolarsError) -> Self {
        PipelineError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for PipelineError {
    fn from(err: bincode::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PipelineError {
    fn from(err: ndarray::ShapeError) -> Self {
        PipelineError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_names_every_column() {
        let err = PipelineError::MissingColumns(vec!["age".to_string(), "income".to_string()]);
        assert_eq!(err.to_string(), "Columns not found in data: age, income");
    }

    #[test]
    fn test_unknown_algorithm_names_tag() {
        let err = PipelineError::UnknownAlgorithm("svm".to_string());
        assert!(err.to_string().contains("svm"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PipelineError = io_err.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
