//! Short-time Fourier transform
//!
//! Batch (whole-signal) STFT/ISTFT pair used to move between waveforms and
//! magnitude spectrograms:
//! - Periodic Hann window, zero-padded to `n_fft` when shorter
//! - Centered framing with reflect or constant boundary padding
//! - Optional orthonormal scaling (`1/sqrt(n_fft)`)
//! - Window-envelope normalized overlap-add on the inverse

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::Array2;
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::error::{DspError, DspResult};

/// Envelope values below this are left un-normalized on the inverse
const ENVELOPE_FLOOR: f32 = 1e-11;

/// Boundary padding applied when framing is centered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PadMode {
    /// Mirror the signal without repeating the edge sample
    #[default]
    Reflect,
    /// Zero padding
    Constant,
}

/// STFT configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StftConfig {
    /// FFT size
    pub n_fft: usize,
    /// Hop between frames (samples)
    pub hop_length: usize,
    /// Window length (<= n_fft)
    pub win_length: usize,
    /// Pad `n_fft / 2` on both sides so frame `t` is centered at `t * hop`
    pub center: bool,
    /// Boundary padding mode
    pub pad_mode: PadMode,
    /// Scale bins by `1/sqrt(n_fft)`
    pub normalized: bool,
}

impl StftConfig {
    /// Defaults for an FFT size: hop `n_fft/4`, full-length window, centered,
    /// reflect padding, un-normalized
    pub fn new(n_fft: usize) -> Self {
        Self {
            n_fft,
            hop_length: (n_fft / 4).max(1),
            win_length: n_fft,
            center: true,
            pad_mode: PadMode::Reflect,
            normalized: false,
        }
    }

    /// Set hop length
    pub fn with_hop_length(mut self, hop_length: usize) -> Self {
        self.hop_length = hop_length;
        self
    }

    /// Set window length
    pub fn with_win_length(mut self, win_length: usize) -> Self {
        self.win_length = win_length;
        self
    }

    /// Enable or disable orthonormal scaling
    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    /// Set boundary padding mode
    pub fn with_pad_mode(mut self, pad_mode: PadMode) -> Self {
        self.pad_mode = pad_mode;
        self
    }

    /// Number of frequency bins produced
    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Frame count produced for a signal of `len` samples
    pub fn num_frames(&self, len: usize) -> usize {
        if self.center {
            1 + len / self.hop_length
        } else if len < self.n_fft {
            0
        } else {
            1 + (len - self.n_fft) / self.hop_length
        }
    }

    /// Check configuration consistency
    pub fn validate(&self) -> DspResult<()> {
        if self.n_fft < 4 || self.n_fft % 2 != 0 {
            return Err(DspError::InvalidConfig(format!(
                "n_fft must be even and >= 4, got {}",
                self.n_fft
            )));
        }
        if self.hop_length == 0 {
            return Err(DspError::InvalidConfig("hop_length must be > 0".into()));
        }
        if self.win_length == 0 || self.win_length > self.n_fft {
            return Err(DspError::InvalidConfig(format!(
                "win_length must be in 1..={}, got {}",
                self.n_fft, self.win_length
            )));
        }
        Ok(())
    }
}

impl Default for StftConfig {
    fn default() -> Self {
        Self::new(512)
    }
}

/// Periodic Hann window of `win_length`, centered inside `n_fft` zeros
pub fn hann_window(win_length: usize, n_fft: usize) -> Vec<f32> {
    let mut window = vec![0.0f32; n_fft];
    let offset = (n_fft - win_length) / 2;
    for i in 0..win_length {
        let phase = 2.0 * PI * i as f32 / win_length as f32;
        window[offset + i] = 0.5 - 0.5 * phase.cos();
    }
    window
}

/// Mirror an out-of-range index back into `0..len` (numpy "reflect")
fn reflect_index(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut m = i.rem_euclid(period);
    if m >= len as isize {
        m = period - m;
    }
    m as usize
}

/// Whole-signal STFT processor
pub struct Stft {
    config: StftConfig,
    window: Vec<f32>,
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft").field("config", &self.config).finish()
    }
}

impl Stft {
    /// Create new STFT processor
    pub fn new(config: StftConfig) -> DspResult<Self> {
        config.validate()?;

        let mut planner = RealFftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(config.n_fft);
        let fft_inverse = planner.plan_fft_inverse(config.n_fft);
        let window = hann_window(config.win_length, config.n_fft);

        Ok(Self {
            config,
            window,
            fft_forward,
            fft_inverse,
        })
    }

    /// Configuration
    pub fn config(&self) -> &StftConfig {
        &self.config
    }

    /// Number of frequency bins
    pub fn num_bins(&self) -> usize {
        self.config.num_bins()
    }

    fn scale(&self) -> f32 {
        if self.config.normalized {
            1.0 / (self.config.n_fft as f32).sqrt()
        } else {
            1.0
        }
    }

    /// Apply boundary padding
    fn pad(&self, signal: &[f32]) -> DspResult<Vec<f32>> {
        if !self.config.center {
            return Ok(signal.to_vec());
        }
        let pad = self.config.n_fft / 2;
        match self.config.pad_mode {
            PadMode::Constant => {
                let mut padded = vec![0.0f32; signal.len() + 2 * pad];
                padded[pad..pad + signal.len()].copy_from_slice(signal);
                Ok(padded)
            }
            PadMode::Reflect => {
                if signal.is_empty() {
                    return Err(DspError::InputTooShort(0, 1));
                }
                Ok((0..signal.len() + 2 * pad)
                    .map(|t| signal[reflect_index(t as isize - pad as isize, signal.len())])
                    .collect())
            }
        }
    }

    /// Forward transform, returns `[bins, frames]`
    pub fn forward(&self, signal: &[f32]) -> DspResult<Array2<Complex32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;

        if !self.config.center && signal.len() < n_fft {
            return Err(DspError::InputTooShort(signal.len(), n_fft));
        }

        let padded = self.pad(signal)?;
        let n_frames = self.config.num_frames(signal.len());
        let n_bins = self.num_bins();
        let scale = self.scale();

        let mut frame = self.fft_forward.make_input_vec();
        let mut spectrum = self.fft_forward.make_output_vec();
        let mut scratch = self.fft_forward.make_scratch_vec();
        let mut output = Array2::<Complex32>::zeros((n_bins, n_frames));

        for t in 0..n_frames {
            let start = t * hop;
            for (i, (sample, &w)) in frame.iter_mut().zip(&self.window).enumerate() {
                *sample = padded[start + i] * w;
            }

            self.fft_forward
                .process_with_scratch(&mut frame, &mut spectrum, &mut scratch)
                .map_err(|e| DspError::FftError(e.to_string()))?;

            for (k, bin) in spectrum.iter().enumerate() {
                output[[k, t]] = bin * scale;
            }
        }

        Ok(output)
    }

    /// Magnitude spectrogram `[bins, frames]`
    pub fn magnitude(&self, signal: &[f32]) -> DspResult<Array2<f32>> {
        Ok(self.forward(signal)?.mapv(|c| c.norm()))
    }

    /// Inverse transform
    ///
    /// With `length`, the output is trimmed or zero-padded to exactly that
    /// many samples and the frame count must match `num_frames(length)`.
    pub fn inverse(&self, spectrum: &Array2<Complex32>, length: Option<usize>) -> DspResult<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let (n_bins, n_frames) = spectrum.dim();

        if n_bins != self.num_bins() {
            return Err(DspError::Shape {
                expected: format!("{} frequency bins", self.num_bins()),
                got: format!("{} frequency bins", n_bins),
            });
        }
        if let Some(len) = length {
            let expected = self.config.num_frames(len);
            if n_frames != expected {
                return Err(DspError::Shape {
                    expected: format!("{} frames for {} samples", expected, len),
                    got: format!("{} frames", n_frames),
                });
            }
        }
        if n_frames == 0 {
            return Ok(vec![0.0; length.unwrap_or(0)]);
        }

        let full_len = n_fft + hop * (n_frames - 1);
        let mut signal = vec![0.0f32; full_len];
        let mut envelope = vec![0.0f32; full_len];

        let unscale = 1.0 / self.scale();
        let norm = 1.0 / n_fft as f32;
        let mut bins = self.fft_inverse.make_input_vec();
        let mut frame = self.fft_inverse.make_output_vec();
        let mut scratch = self.fft_inverse.make_scratch_vec();

        for t in 0..n_frames {
            for (k, bin) in bins.iter_mut().enumerate() {
                *bin = spectrum[[k, t]] * unscale;
            }
            // DC and Nyquist must be purely real for a real inverse
            bins[0].im = 0.0;
            bins[n_bins - 1].im = 0.0;

            self.fft_inverse
                .process_with_scratch(&mut bins, &mut frame, &mut scratch)
                .map_err(|e| DspError::FftError(e.to_string()))?;

            let start = t * hop;
            for (i, (&s, &w)) in frame.iter().zip(&self.window).enumerate() {
                signal[start + i] += s * norm * w;
                envelope[start + i] += w * w;
            }
        }

        for (s, &env) in signal.iter_mut().zip(&envelope) {
            if env > ENVELOPE_FLOOR {
                *s /= env;
            }
        }

        let start = if self.config.center { n_fft / 2 } else { 0 };
        let end = match length {
            Some(len) => start + len,
            None if self.config.center => full_len.saturating_sub(n_fft / 2),
            None => full_len,
        };

        let mut output: Vec<f32> = signal[start.min(full_len)..end.min(full_len)].to_vec();
        if let Some(len) = length {
            output.resize(len, 0.0);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(len: usize, freq: f32, sample_rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_reflect_index() {
        // [a b c d] reflected: c b | a b c d | c b
        assert_eq!(reflect_index(-1, 4), 1);
        assert_eq!(reflect_index(-2, 4), 2);
        assert_eq!(reflect_index(4, 4), 2);
        assert_eq!(reflect_index(5, 4), 1);
        assert_eq!(reflect_index(0, 1), 0);
    }

    #[test]
    fn test_hann_window_periodic() {
        let w = hann_window(8, 8);
        assert_relative_eq!(w[0], 0.0);
        assert_relative_eq!(w[4], 1.0, epsilon = 1e-6);
        // Periodic window is not symmetric around the last sample
        assert!(w[7] > 0.0);
    }

    #[test]
    fn test_hann_window_short_is_centered() {
        let w = hann_window(4, 8);
        assert_eq!(w[0], 0.0);
        assert_eq!(w[1], 0.0);
        assert_eq!(w[7], 0.0);
        assert_relative_eq!(w[4], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_frame_count() {
        let stft = Stft::new(StftConfig::new(512)).unwrap();
        let spec = stft.forward(&vec![0.1f32; 32000]).unwrap();
        assert_eq!(spec.dim(), (257, 251));
    }

    #[test]
    fn test_round_trip_sine() {
        let stft = Stft::new(StftConfig::new(512)).unwrap();
        let signal = sine(8000, 440.0, 16000.0);
        let spec = stft.forward(&signal).unwrap();
        let rebuilt = stft.inverse(&spec, Some(signal.len())).unwrap();

        assert_eq!(rebuilt.len(), signal.len());
        for (a, b) in signal.iter().zip(&rebuilt) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_round_trip_normalized() {
        let config = StftConfig::new(256).with_normalized(true);
        let stft = Stft::new(config).unwrap();
        let signal = sine(4000, 1000.0, 16000.0);
        let rebuilt = stft
            .inverse(&stft.forward(&signal).unwrap(), Some(signal.len()))
            .unwrap();
        for (a, b) in signal.iter().zip(&rebuilt) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_normalized_scaling() {
        let plain = Stft::new(StftConfig::new(256)).unwrap();
        let scaled = Stft::new(StftConfig::new(256).with_normalized(true)).unwrap();
        let signal = sine(2048, 500.0, 16000.0);
        let a = plain.magnitude(&signal).unwrap();
        let b = scaled.magnitude(&signal).unwrap();
        assert_relative_eq!(a[[8, 3]] / 16.0, b[[8, 3]], epsilon = 1e-4);
    }

    #[test]
    fn test_inverse_rejects_wrong_bins() {
        let stft = Stft::new(StftConfig::new(512)).unwrap();
        let spec = Array2::<Complex32>::zeros((256, 10));
        assert!(matches!(stft.inverse(&spec, None), Err(DspError::Shape { .. })));
    }

    #[test]
    fn test_inverse_rejects_wrong_frame_count() {
        let stft = Stft::new(StftConfig::new(512)).unwrap();
        let spec = Array2::<Complex32>::zeros((257, 10));
        // 16000 samples imply 126 frames at hop 128
        assert!(matches!(
            stft.inverse(&spec, Some(16000)),
            Err(DspError::Shape { .. })
        ));
    }

    #[test]
    fn test_invalid_config() {
        assert!(Stft::new(StftConfig::new(511)).is_err());
        assert!(Stft::new(StftConfig::new(512).with_hop_length(0)).is_err());
        assert!(Stft::new(StftConfig::new(512).with_win_length(1024)).is_err());
    }

    #[test]
    fn test_short_signal_reflects() {
        let stft = Stft::new(StftConfig::new(512)).unwrap();
        // Shorter than the pad: repeated reflection keeps indices in range
        let spec = stft.forward(&[0.1, -0.2, 0.3]).unwrap();
        assert_eq!(spec.dim(), (257, 1));
        assert!(stft.forward(&[]).is_err());
    }

    #[test]
    fn test_silence_is_zero() {
        let stft = Stft::new(StftConfig::new(512)).unwrap();
        let mag = stft.magnitude(&vec![0.0f32; 4000]).unwrap();
        assert!(mag.iter().all(|&m| m == 0.0));
    }
}
