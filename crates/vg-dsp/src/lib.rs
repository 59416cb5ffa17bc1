//! vg-dsp: Spectral DSP for VoiceGuard
//!
//! Signal-level building blocks shared by the masking, training and
//! inference stages:
//! - STFT/ISTFT with centered reflect framing
//! - Griffin-Lim phase reconstruction with momentum
//! - Parabolic spectral-peak pitch tracking
//! - Log-spectral distance and segmental SNR

pub mod error;
pub mod griffin_lim;
pub mod metrics;
pub mod pitch;
pub mod stft;

pub use error::{DspError, DspResult};
pub use griffin_lim::{GriffinLim, GriffinLimConfig};
pub use metrics::{lsd, segmental_snr};
pub use pitch::{piptrack, PiptrackConfig, PitchTrack};
pub use stft::{hann_window, PadMode, Stft, StftConfig};
