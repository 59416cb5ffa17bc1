//! Griffin-Lim phase reconstruction
//!
//! Recovers a waveform from a magnitude spectrogram by alternating
//! projections with momentum ("fast" Griffin-Lim). Phase is initialised
//! from a seeded uniform draw so results are reproducible.

use std::f32::consts::PI;

use ndarray::{Array2, Zip};
use num_complex::Complex32;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DspError, DspResult};
use crate::stft::Stft;

/// Griffin-Lim configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GriffinLimConfig {
    /// Number of projection iterations
    pub iterations: usize,
    /// Momentum applied to the previous rebuilt spectrum
    pub momentum: f32,
    /// Seed for the initial random phase
    pub seed: u64,
}

impl Default for GriffinLimConfig {
    fn default() -> Self {
        Self {
            iterations: 32,
            momentum: 0.99,
            seed: 0,
        }
    }
}

/// Magnitude-only waveform reconstruction
#[derive(Debug)]
pub struct GriffinLim {
    config: GriffinLimConfig,
    stft: Stft,
}

impl GriffinLim {
    pub fn new(stft: Stft, config: GriffinLimConfig) -> DspResult<Self> {
        if !(0.0..1.0).contains(&config.momentum) {
            return Err(DspError::InvalidConfig(format!(
                "momentum must be in [0, 1), got {}",
                config.momentum
            )));
        }
        if !stft.config().center {
            return Err(DspError::InvalidConfig(
                "Griffin-Lim requires centered framing".into(),
            ));
        }
        Ok(Self { config, stft })
    }

    /// Underlying transform
    pub fn stft(&self) -> &Stft {
        &self.stft
    }

    /// Reconstruct a waveform of `(frames - 1) * hop` samples from `[bins, frames]`
    pub fn reconstruct(&self, magnitude: &Array2<f32>) -> DspResult<Vec<f32>> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut angles: Array2<Complex32> = Array2::from_shape_simple_fn(magnitude.raw_dim(), || {
            Complex32::from_polar(1.0, 2.0 * PI * rng.random::<f32>())
        });

        let blend = self.config.momentum / (1.0 + self.config.momentum);
        let mut rebuilt = Array2::<Complex32>::zeros(magnitude.raw_dim());

        for _ in 0..self.config.iterations {
            let previous = rebuilt;
            let signal = self.stft.inverse(&apply_phase(magnitude, &angles), None)?;
            rebuilt = self.stft.forward(&signal)?;

            if rebuilt.dim() != magnitude.dim() {
                return Err(DspError::Shape {
                    expected: format!("{:?}", magnitude.dim()),
                    got: format!("{:?}", rebuilt.dim()),
                });
            }

            Zip::from(&mut angles)
                .and(&rebuilt)
                .and(&previous)
                .for_each(|a, &r, &p| {
                    let v = r - p * blend;
                    *a = v / (v.norm() + 1e-16);
                });
        }

        self.stft.inverse(&apply_phase(magnitude, &angles), None)
    }
}

fn apply_phase(magnitude: &Array2<f32>, angles: &Array2<Complex32>) -> Array2<Complex32> {
    Zip::from(magnitude)
        .and(angles)
        .map_collect(|&m, &a| a * m)
}
