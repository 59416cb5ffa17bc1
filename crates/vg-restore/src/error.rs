//! Error types for perturbation masking

use thiserror::Error;
use vg_dsp::DspError;

/// Masking error types
#[derive(Error, Debug)]
pub enum RestoreError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid sample rate
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    /// Empty input waveform
    #[error("Empty input waveform")]
    EmptyInput,

    /// Spectral transform failure
    #[error("Spectral error: {0}")]
    Dsp(#[from] DspError),
}

/// Result type for masking operations
pub type RestoreResult<T> = Result<T, RestoreError>;
