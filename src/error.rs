//! Error types for the matrix processing unit simulator

use thiserror::Error;

/// Result type for simulator operations
pub type MpuResult<T> = Result<T, MpuError>;

/// Simulator errors
#[derive(Debug, Error)]
pub enum MpuError {
    #[error("Out of bounds: {message}")]
    OutOfBounds { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error(
        "Result mismatch at ({row}, {column}): expected {expected}, got {actual} \
         ({mismatches} mismatching elements)"
    )]
    ResultMismatch {
        row: usize,
        column: usize,
        expected: String,
        actual: String,
        mismatches: usize,
    },

    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl MpuError {
    pub fn out_of_bounds(msg: impl Into<String>) -> Self {
        MpuError::OutOfBounds { message: msg.into() }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        MpuError::InvalidConfiguration { message: msg.into() }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        MpuError::MalformedRequest { message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        MpuError::Config { message: msg.into() }
    }
}
