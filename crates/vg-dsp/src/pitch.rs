//! Spectral peak pitch tracking
//!
//! Parabolically-interpolated peak picking on a magnitude spectrogram.
//! A bin is a candidate when it is a local maximum across frequency, its
//! magnitude exceeds `threshold` times the frame mean, and its centre
//! frequency lies in `[fmin, fmax)`.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{DspError, DspResult};

/// Pitch tracker parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiptrackConfig {
    /// Sample rate of the analysed signal (Hz)
    pub sample_rate: u32,
    /// Lowest candidate frequency (Hz, inclusive)
    pub fmin: f32,
    /// Highest candidate frequency (Hz, exclusive, capped at Nyquist)
    pub fmax: f32,
    /// Multiple of the per-frame mean magnitude a peak must exceed
    pub threshold: f32,
}

impl Default for PiptrackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            fmin: 300.0,
            fmax: 4000.0,
            threshold: 1.0,
        }
    }
}

/// Per-bin pitch estimates; zero where no peak was found
#[derive(Debug, Clone)]
pub struct PitchTrack {
    /// Interpolated frequency (Hz), `[bins, frames]`
    pub pitches: Array2<f32>,
    /// Interpolated peak magnitude, `[bins, frames]`
    pub magnitudes: Array2<f32>,
}

impl PitchTrack {
    /// Mean over all nonzero peak magnitudes, `None` when nothing was tracked
    pub fn mean_nonzero_magnitude(&self) -> Option<f32> {
        let (sum, count) = self
            .magnitudes
            .iter()
            .filter(|&&m| m != 0.0)
            .fold((0.0f64, 0usize), |(s, c), &m| (s + m as f64, c + 1));
        (count > 0).then(|| (sum / count as f64) as f32)
    }
}

/// Vertex offset of the parabola through `(prev, cur, next)`
fn parabolic_shift(prev: f32, cur: f32, next: f32) -> f32 {
    let a = next + prev - 2.0 * cur;
    let b = 0.5 * (next - prev);
    if b.abs() >= a.abs() { 0.0 } else { -b / a }
}

/// Track spectral peaks in a magnitude spectrogram `[bins, frames]`
pub fn piptrack(spectrum: &Array2<f32>, config: &PiptrackConfig) -> DspResult<PitchTrack> {
    let (n_bins, n_frames) = spectrum.dim();
    if n_bins < 3 {
        return Err(DspError::Shape {
            expected: "at least 3 frequency bins".into(),
            got: format!("{} frequency bins", n_bins),
        });
    }

    let n_fft = 2 * (n_bins - 1);
    let sr = config.sample_rate as f32;
    let fmax = config.fmax.min(sr / 2.0);
    let bin_hz = sr / n_fft as f32;

    let mut pitches = Array2::<f32>::zeros((n_bins, n_frames));
    let mut magnitudes = Array2::<f32>::zeros((n_bins, n_frames));

    let candidate_bins: Vec<usize> = (1..n_bins - 1)
        .filter(|&k| {
            let f = k as f32 * bin_hz;
            config.fmin <= f && f < fmax
        })
        .collect();

    for t in 0..n_frames {
        let column = spectrum.column(t);
        let mean = column.sum() / n_bins as f32;
        let floor = config.threshold * mean;
        let gated = |k: usize| if column[k] > floor { column[k] } else { 0.0 };

        for &k in &candidate_bins {
            let (prev, cur, next) = (gated(k - 1), gated(k), gated(k + 1));
            if !(cur > prev && cur >= next) {
                continue;
            }

            let (s_prev, s_cur, s_next) = (column[k - 1], column[k], column[k + 1]);
            let shift = parabolic_shift(s_prev, s_cur, s_next);
            let slope = 0.5 * (s_next - s_prev);

            magnitudes[[k, t]] = s_cur + 0.5 * slope * shift;
            pitches[[k, t]] = (k as f32 + shift) * bin_hz;
        }
    }

    Ok(PitchTrack {
        pitches,
        magnitudes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_peak() {
        let mut spec = Array2::<f32>::zeros((257, 2));
        // Peak at bin 32 (1000 Hz) with a symmetric skirt
        for t in 0..2 {
            spec[[31, t]] = 0.5;
            spec[[32, t]] = 2.0;
            spec[[33, t]] = 0.5;
        }
        let track = piptrack(&spec, &PiptrackConfig::default()).unwrap();

        assert_relative_eq!(track.pitches[[32, 0]], 1000.0, epsilon = 1e-3);
        assert_relative_eq!(track.magnitudes[[32, 1]], 2.0, epsilon = 1e-6);
        // Skirt bins fall under the local-max test
        assert_eq!(track.magnitudes[[31, 0]], 0.0);
        assert_relative_eq!(track.mean_nonzero_magnitude().unwrap(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_asymmetric_peak_interpolates() {
        let mut spec = Array2::<f32>::zeros((257, 1));
        spec[[40, 0]] = 1.0;
        spec[[41, 0]] = 2.0;
        spec[[42, 0]] = 1.5;
        let track = piptrack(&spec, &PiptrackConfig::default()).unwrap();

        // Vertex leans toward the larger neighbour
        let shift = parabolic_shift(1.0, 2.0, 1.5);
        assert!(shift > 0.0 && shift < 0.5);
        assert_relative_eq!(track.pitches[[41, 0]], (41.0 + shift) * 31.25, epsilon = 1e-3);
        assert!(track.magnitudes[[41, 0]] > 2.0);
    }

    #[test]
    fn test_out_of_range_peaks_ignored() {
        let mut spec = Array2::<f32>::zeros((257, 1));
        // 125 Hz and 6000 Hz are outside [300, 4000)
        spec[[4, 0]] = 3.0;
        spec[[192, 0]] = 3.0;
        let track = piptrack(&spec, &PiptrackConfig::default()).unwrap();
        assert!(track.mean_nonzero_magnitude().is_none());
    }

    #[test]
    fn test_silence_has_no_peaks() {
        let spec = Array2::<f32>::zeros((257, 10));
        let track = piptrack(&spec, &PiptrackConfig::default()).unwrap();
        assert!(track.magnitudes.iter().all(|&m| m == 0.0));
        assert!(track.mean_nonzero_magnitude().is_none());
    }

    #[test]
    fn test_rejects_tiny_spectrum() {
        let spec = Array2::<f32>::zeros((2, 4));
        assert!(piptrack(&spec, &PiptrackConfig::default()).is_err());
    }
}
