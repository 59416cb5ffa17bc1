//! Error types for training and inference

use std::path::PathBuf;

use thiserror::Error;
use vg_dsp::DspError;
use vg_file::FileError;
use vg_restore::RestoreError;

/// Training / inference error types
#[derive(Error, Debug)]
pub enum MlError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Low/high resolution metadata lists do not pair up
    #[error("Dataset alignment error: {0}")]
    Alignment(String),

    /// Tensor or array shape mismatch
    #[error("Shape mismatch: expected {expected}, got {got}")]
    Shape { expected: String, got: String },

    /// Checkpoint missing, unreadable or inconsistent with the models
    #[error("Checkpoint error ({path}): {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    /// Loss or score diverged to NaN or infinity
    #[error("Non-finite {metric} ({value}) at epoch {epoch}")]
    NonFinite { epoch: usize, metric: String, value: f64 },

    /// Compute device unavailable
    #[error("Device error: {0}")]
    Device(String),

    /// Audio file at an unexpected sample rate
    #[error("Sample rate mismatch in {path}: expected {expected}, got {got}")]
    SampleRate { path: PathBuf, expected: u32, got: u32 },

    /// Resampler failure
    #[error("Resampling failed: {0}")]
    Resample(String),

    /// Tensor backend error
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Audio/metadata file error
    #[error(transparent)]
    File(#[from] FileError),

    /// Masking error
    #[error(transparent)]
    Restore(#[from] RestoreError),

    /// Spectral processing error
    #[error(transparent)]
    Dsp(#[from] DspError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for ML operations
pub type MlResult<T> = Result<T, MlError>;
