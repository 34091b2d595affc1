//! Error types for the probing pipeline
//!
//! Alignment and configuration problems are always fatal. The only
//! graceful degradation (unseen test labels) is reported through
//! [`crate::tensors::BuildReport`], not through this enum.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading, aligning, or training
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Parallel inputs disagree (sentence counts, row counts, empty runs)
    #[error("Data mismatch: {0}")]
    DataMismatch(String),

    /// Invalid mode, layer filter, or hyperparameter
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to read an input file
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Malformed JSON activation dump
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Matrix construction failed
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl ProbeError {
    pub(crate) fn mismatch(msg: impl Into<String>) -> Self {
        Self::DataMismatch(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, ProbeError>;
