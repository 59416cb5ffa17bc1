//! Adaptive frequency-band perturbation masking (AFPM)
//!
//! Suppresses low-energy spectral entries that are likely to carry
//! adversarial perturbation:
//! - Speaker-related bands: entries below `K x maxDiff[bin]` are zeroed,
//!   where `maxDiff` is the largest deviation a small probe noise causes
//!   in that bin
//! - Remaining bins: entries below `f x ts` are zeroed, `ts` being the mean
//!   magnitude of tracked pitch peaks (300-4000 Hz)
//! - Training preset keeps a random fraction of the would-be-zeroed
//!   entries and adds pulse bursts to the probe
//!
//! Comparisons are strict: with a zero-amplitude probe `maxDiff` is zero
//! and speaker-related bands pass through untouched.

use ndarray::Array2;
use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use vg_dsp::{piptrack, PiptrackConfig, Stft, StftConfig};

use crate::bands::{default_high_bands, BandLayout, BandSpec};
use crate::error::{RestoreError, RestoreResult};
use crate::probe::{synthesize, BurstConfig, ProbeConfig};

/// Threshold rule for one class of bins
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskRule {
    /// Multiplier on the reference level (`maxDiff` or `ts`)
    pub factor: f32,
    /// Fraction of under-threshold entries kept, chosen at random
    pub keep_fraction: f32,
}

/// AFPM configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfpmConfig {
    /// Sample rate of the incoming waveform
    pub sample_rate: u32,
    /// FFT size of the masked spectrogram
    pub n_fft: usize,
    /// Speaker-related bands
    pub bands: Vec<BandSpec>,
    /// Probe synthesis
    pub probe: ProbeConfig,
    /// Rule for speaker-related bins (reference: probe deviation)
    pub high: MaskRule,
    /// Rule for other bins (reference: pitch-peak mean)
    pub low: MaskRule,
    /// Pitch tracker used for the low-band threshold
    pub pitch: PiptrackConfig,
}

impl AfpmConfig {
    /// Deterministic masking used when enhancing audio
    pub fn inference() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 512,
            bands: default_high_bands(),
            probe: ProbeConfig {
                noise_amplitude: 0.002,
                burst: None,
            },
            high: MaskRule {
                factor: 15.0,
                keep_fraction: 0.0,
            },
            low: MaskRule {
                factor: 0.7,
                keep_fraction: 0.0,
            },
            pitch: PiptrackConfig::default(),
        }
    }

    /// Stochastic masking used to build training inputs
    pub fn training() -> Self {
        Self {
            probe: ProbeConfig {
                noise_amplitude: 0.002,
                burst: Some(BurstConfig::default()),
            },
            high: MaskRule {
                factor: 25.0,
                keep_fraction: 0.05,
            },
            low: MaskRule {
                factor: 1.0,
                keep_fraction: 0.15,
            },
            ..Self::inference()
        }
    }

    /// Set the waveform sample rate (pitch tracker follows)
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self.pitch.sample_rate = sample_rate;
        self
    }

    /// Set the FFT size
    pub fn with_n_fft(mut self, n_fft: usize) -> Self {
        self.n_fft = n_fft;
        self
    }

    /// Set the probe noise half-width
    pub fn with_probe_amplitude(mut self, amplitude: f32) -> Self {
        self.probe.noise_amplitude = amplitude;
        self
    }

    pub fn validate(&self) -> RestoreResult<()> {
        if self.sample_rate == 0 {
            return Err(RestoreError::InvalidSampleRate(self.sample_rate));
        }
        self.probe.validate()?;
        for (name, rule) in [("high", &self.high), ("low", &self.low)] {
            if !(rule.factor >= 0.0) {
                return Err(RestoreError::InvalidConfig(format!(
                    "{} factor must be >= 0, got {}",
                    name, rule.factor
                )));
            }
            if !(0.0..=1.0).contains(&rule.keep_fraction) {
                return Err(RestoreError::InvalidConfig(format!(
                    "{} keep_fraction must be in [0, 1], got {}",
                    name, rule.keep_fraction
                )));
            }
        }
        Ok(())
    }
}

impl Default for AfpmConfig {
    fn default() -> Self {
        Self::inference()
    }
}

/// Masked spectrogram plus the levels that produced it
#[derive(Debug, Clone)]
pub struct AfpmOutput {
    /// Masked magnitude `[bins, frames]`, all entries >= 0
    pub magnitude: Array2<f32>,
    /// Per-bin probe deviation; zero outside speaker-related bands
    pub max_diff: Vec<f32>,
    /// Pitch-peak mean, `None` when no peak was tracked (no masking applied)
    pub pitch_threshold: Option<f32>,
}

impl AfpmOutput {
    /// Fraction of entries set to zero
    pub fn sparsity(&self) -> f32 {
        let zeros = self.magnitude.iter().filter(|&&m| m == 0.0).count();
        zeros as f32 / self.magnitude.len().max(1) as f32
    }
}

/// AFPM processor
#[derive(Debug)]
pub struct Afpm {
    config: AfpmConfig,
    stft: Stft,
    layout: BandLayout,
}

impl Afpm {
    pub fn new(config: AfpmConfig) -> RestoreResult<Self> {
        config.validate()?;
        let stft = Stft::new(StftConfig::new(config.n_fft))?;
        let layout = BandLayout::new(&config.bands, config.sample_rate, config.n_fft)?;
        Ok(Self {
            config,
            stft,
            layout,
        })
    }

    pub fn config(&self) -> &AfpmConfig {
        &self.config
    }

    pub fn layout(&self) -> &BandLayout {
        &self.layout
    }

    /// Un-masked magnitude of a waveform with the same transform
    pub fn magnitude(&self, waveform: &[f32]) -> RestoreResult<Array2<f32>> {
        if waveform.is_empty() {
            return Err(RestoreError::EmptyInput);
        }
        Ok(self.stft.magnitude(waveform)?)
    }

    /// Mask a waveform's magnitude spectrogram
    pub fn apply<R: Rng + ?Sized>(&self, waveform: &[f32], rng: &mut R) -> RestoreResult<AfpmOutput> {
        let mut amp = self.magnitude(waveform)?;
        let n_bins = amp.nrows();

        let track = piptrack(&amp, &self.config.pitch)?;
        let Some(ts) = track.mean_nonzero_magnitude() else {
            log::debug!("No pitch peaks tracked, passing magnitude through unmasked");
            return Ok(AfpmOutput {
                magnitude: amp,
                max_diff: vec![0.0; n_bins],
                pitch_threshold: None,
            });
        };

        let probe = synthesize(waveform, self.config.sample_rate, &self.config.probe, rng);
        let amp_probe = self.stft.magnitude(&probe)?;

        let mut max_diff = vec![0.0f32; n_bins];
        for (j, (mut row, probe_row)) in amp.rows_mut().into_iter().zip(amp_probe.rows()).enumerate() {
            let (threshold, rule) = if self.layout.is_high(j) {
                let diff = row
                    .iter()
                    .zip(probe_row.iter())
                    .fold(0.0f32, |m, (&a, &p)| m.max((p - a).abs()));
                max_diff[j] = diff;
                (diff * self.config.high.factor, self.config.high)
            } else {
                (ts * self.config.low.factor, self.config.low)
            };

            let under: Vec<usize> = row
                .iter()
                .enumerate()
                .filter(|(_, v)| **v < threshold)
                .map(|(t, _)| t)
                .collect();

            let keep = (under.len() as f32 * rule.keep_fraction) as usize;
            let mut kept = vec![false; under.len()];
            if keep > 0 {
                for i in index::sample(rng, under.len(), keep) {
                    kept[i] = true;
                }
            }

            for (&t, &k) in under.iter().zip(&kept) {
                if !k {
                    row[t] = 0.0;
                }
            }
        }

        Ok(AfpmOutput {
            magnitude: amp,
            max_diff,
            pitch_threshold: Some(ts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::f32::consts::PI;

    fn voiced(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / 16000.0;
                0.4 * (2.0 * PI * 500.0 * t).sin() + 0.2 * (2.0 * PI * 1500.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_presets_differ() {
        let inference = AfpmConfig::inference();
        let training = AfpmConfig::training();
        assert_eq!(inference.high.factor, 15.0);
        assert_eq!(training.high.factor, 25.0);
        assert_eq!(inference.low.factor, 0.7);
        assert_eq!(training.low.keep_fraction, 0.15);
        assert!(inference.probe.burst.is_none());
        assert!(training.probe.burst.is_some());
    }

    #[test]
    fn test_output_shape_and_sign() {
        let afpm = Afpm::new(AfpmConfig::inference()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = afpm.apply(&voiced(32000), &mut rng).unwrap();
        assert_eq!(out.magnitude.dim(), (257, 251));
        assert!(out.magnitude.iter().all(|&m| m >= 0.0));
        assert!(out.pitch_threshold.is_some());
        assert!(out.sparsity() > 0.0);
    }

    #[test]
    fn test_low_band_threshold() {
        let afpm = Afpm::new(AfpmConfig::inference()).unwrap();
        let wave = voiced(16000);
        let raw = afpm.magnitude(&wave).unwrap();
        let out = afpm.apply(&wave, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        let ts = out.pitch_threshold.unwrap();

        // Bin 0 is outside every speaker-related band
        for t in 0..raw.ncols() {
            let expected = if raw[[0, t]] < ts * 0.7 { 0.0 } else { raw[[0, t]] };
            assert_eq!(out.magnitude[[0, t]], expected);
        }
    }

    #[test]
    fn test_training_is_reproducible_per_seed() {
        let afpm = Afpm::new(AfpmConfig::training()).unwrap();
        let wave = voiced(16000);
        let a = afpm.apply(&wave, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        let b = afpm.apply(&wave, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        assert_eq!(a.magnitude, b.magnitude);
        assert_eq!(a.max_diff, b.max_diff);
    }

    #[test]
    fn test_training_keeps_fraction() {
        let inference = Afpm::new(AfpmConfig::inference().with_probe_amplitude(0.0)).unwrap();
        let mut config = AfpmConfig::training().with_probe_amplitude(0.0);
        config.probe.burst = None;
        config.low.factor = 0.7;
        let training = Afpm::new(config).unwrap();

        let wave = voiced(16000);
        let hard = inference.apply(&wave, &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
        let soft = training.apply(&wave, &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
        // Same thresholds, but a random subset of low-band entries survives
        assert!(soft.sparsity() < hard.sparsity());
    }

    #[test]
    fn test_empty_input() {
        let afpm = Afpm::new(AfpmConfig::inference()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(afpm.apply(&[], &mut rng), Err(RestoreError::EmptyInput)));
    }

    #[test]
    fn test_invalid_keep_fraction() {
        let mut config = AfpmConfig::training();
        config.low.keep_fraction = 1.5;
        assert!(Afpm::new(config).is_err());
    }
}
