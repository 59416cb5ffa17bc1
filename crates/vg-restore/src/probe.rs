//! Perturbation probe synthesis
//!
//! The probe is the input waveform plus small uniform noise and, in the
//! training preset, an occasional burst of extra noise and rectangular
//! pulses. Only its spectral deviation from the input is used.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{RestoreError, RestoreResult};

/// Random pulse/noise burst added to the probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Chance that a probe receives a burst
    pub probability: f64,
    /// Range of the extra uniform noise level
    pub noise_level: (f32, f32),
    /// Number of pulses per burst
    pub pulses: usize,
    /// Pulse duration range (seconds)
    pub duration_s: (f32, f32),
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            probability: 0.5,
            noise_level: (0.002, 0.01),
            pulses: 20,
            duration_s: (0.05, 0.1),
        }
    }
}

/// Probe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Half-width of the base uniform noise
    pub noise_amplitude: f32,
    /// Optional burst augmentation
    pub burst: Option<BurstConfig>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            noise_amplitude: 0.002,
            burst: None,
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> RestoreResult<()> {
        if !(self.noise_amplitude >= 0.0) {
            return Err(RestoreError::InvalidConfig(format!(
                "noise_amplitude must be >= 0, got {}",
                self.noise_amplitude
            )));
        }
        if let Some(burst) = &self.burst {
            if !(0.0..=1.0).contains(&burst.probability) {
                return Err(RestoreError::InvalidConfig(format!(
                    "burst probability must be in [0, 1], got {}",
                    burst.probability
                )));
            }
            let (lo, hi) = burst.noise_level;
            if !(0.0 <= lo && lo <= hi) {
                return Err(RestoreError::InvalidConfig("invalid burst noise level range".into()));
            }
            let (lo, hi) = burst.duration_s;
            if !(0.0 <= lo && lo <= hi) {
                return Err(RestoreError::InvalidConfig("invalid burst duration range".into()));
            }
        }
        Ok(())
    }
}

/// Uniform sample in `[lo, hi)`, `lo` when the range is empty
fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f32, hi: f32) -> f32 {
    if hi > lo { rng.random_range(lo..hi) } else { lo }
}

fn add_uniform_noise<R: Rng + ?Sized>(signal: &mut [f32], amplitude: f32, rng: &mut R) {
    if amplitude <= 0.0 {
        return;
    }
    for s in signal.iter_mut() {
        *s += rng.random_range(-amplitude..amplitude);
    }
}

/// Build the probe signal for `waveform`
pub fn synthesize<R: Rng + ?Sized>(
    waveform: &[f32],
    sample_rate: u32,
    config: &ProbeConfig,
    rng: &mut R,
) -> Vec<f32> {
    let mut probe = waveform.to_vec();
    add_uniform_noise(&mut probe, config.noise_amplitude, rng);

    let Some(burst) = &config.burst else {
        return probe;
    };
    if !rng.random_bool(burst.probability) {
        return probe;
    }

    let total = waveform.len();
    let peak = waveform.iter().fold(0.0f32, |m, s| m.max(s.abs()));

    let level = uniform(rng, burst.noise_level.0, burst.noise_level.1);
    let mut burst_signal = vec![0.0f32; total];
    add_uniform_noise(&mut burst_signal, level, rng);

    for _ in 0..burst.pulses {
        let amplitude = if rng.random_bool(0.5) { peak } else { -peak };
        let duration = uniform(rng, burst.duration_s.0, burst.duration_s.1);
        let length = ((duration * sample_rate as f32) as usize).min(total);
        let start = if total > length {
            rng.random_range(0..total - length)
        } else {
            0
        };
        for s in &mut burst_signal[start..start + length] {
            *s += amplitude;
        }
    }

    for (p, b) in probe.iter_mut().zip(&burst_signal) {
        *p += b;
    }
    probe
}
