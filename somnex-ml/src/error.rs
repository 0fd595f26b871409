//! Error types for the somnex-ml crate.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for filtering, inference and fold orchestration.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Invalid band [{low_hz}, {high_hz}] Hz: {reason}")]
    InvalidBand {
        low_hz: f64,
        high_hz: f64,
        reason: String,
    },

    #[error("Failed to load checkpoint {}: {reason}", path.display())]
    CheckpointLoad { path: PathBuf, reason: String },

    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Worker for fold {fold} failed: {message}")]
    Worker { fold: u32, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl MlError {
    pub fn invalid_band(low_hz: f64, high_hz: f64, reason: impl Into<String>) -> Self {
        Self::InvalidBand {
            low_hz,
            high_hz,
            reason: reason.into(),
        }
    }

    pub fn checkpoint(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CheckpointLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn shape(
        what: impl Into<String>,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<ndarray::ShapeError> for MlError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::ShapeMismatch {
            what: "array reshape".to_string(),
            expected: "compatible layout".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<somnex_core::ConfigError> for MlError {
    fn from(err: somnex_core::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
