//! vg-restore: Perturbation masking for speaker-verification audio
//!
//! ## Frequency bands
//! - Vocal-fold (50-300 Hz), formant (4-5.5 kHz), fricative (6.5-7.8 kHz)
//! - Resolved once to STFT bin ranges
//!
//! ## Perturbation probe
//! - Uniform probe noise, optional pulse bursts for training
//!
//! ## AFPM
//! - Probe-deviation thresholds in speaker-related bands
//! - Pitch-peak thresholds elsewhere
//! - Inference (deterministic) and training (stochastic keep) presets

pub mod afpm;
pub mod bands;
pub mod probe;

mod error;

pub use afpm::{Afpm, AfpmConfig, AfpmOutput, MaskRule};
pub use bands::{default_high_bands, BandLayout, BandSpec, FrequencyBand};
pub use error::{RestoreError, RestoreResult};
pub use probe::{BurstConfig, ProbeConfig};
