//! Error types for spectral processing

use thiserror::Error;

/// Spectral processing errors
#[derive(Debug, Error)]
pub enum DspError {
    /// Array dimension mismatch
    #[error("Shape mismatch: expected {expected}, got {got}")]
    Shape { expected: String, got: String },

    /// Invalid transform configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input too short for analysis
    #[error("Input too short: {0} samples, need at least {1}")]
    InputTooShort(usize, usize),

    /// FFT error
    #[error("FFT error: {0}")]
    FftError(String),
}

/// Result type for spectral operations
pub type DspResult<T> = Result<T, DspError>;
