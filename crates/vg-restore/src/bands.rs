//! Speaker-related frequency bands
//!
//! Bands are given in Hz and resolved once to STFT bin ranges:
//! `start = floor(bins * lo / nyquist)`, `end = ceil(bins * hi / nyquist)`.
//! Bins inside any band are "high" (speaker-related, probe-thresholded);
//! everything else is "low" (pitch-thresholded).

use serde::{Deserialize, Serialize};

use crate::error::{RestoreError, RestoreResult};

/// Band definition in Hz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSpec {
    /// Band name (for logs)
    pub name: String,
    /// Lower edge (Hz)
    pub low_hz: f32,
    /// Upper edge (Hz)
    pub high_hz: f32,
}

impl BandSpec {
    pub fn new(name: &str, low_hz: f32, high_hz: f32) -> Self {
        Self {
            name: name.to_string(),
            low_hz,
            high_hz,
        }
    }
}

/// Vocal-fold, formant and fricative bands
pub fn default_high_bands() -> Vec<BandSpec> {
    vec![
        BandSpec::new("vocal_fold", 50.0, 300.0),
        BandSpec::new("formant", 4000.0, 5500.0),
        BandSpec::new("fricative", 6500.0, 7800.0),
    ]
}

/// Band resolved to a half-open bin range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyBand {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

impl FrequencyBand {
    #[inline]
    pub fn contains(&self, bin: usize) -> bool {
        self.start <= bin && bin < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

/// Partition of STFT bins into high and low bands
#[derive(Debug, Clone)]
pub struct BandLayout {
    bands: Vec<FrequencyBand>,
    num_bins: usize,
}

impl BandLayout {
    /// Resolve band specs for an FFT size and sample rate
    pub fn new(specs: &[BandSpec], sample_rate: u32, n_fft: usize) -> RestoreResult<Self> {
        if sample_rate == 0 {
            return Err(RestoreError::InvalidSampleRate(sample_rate));
        }
        let num_bins = n_fft / 2 + 1;
        let nyquist = sample_rate as f64 / 2.0;

        let mut bands = Vec::with_capacity(specs.len());
        for spec in specs {
            if !(spec.low_hz >= 0.0 && spec.low_hz <= spec.high_hz) {
                return Err(RestoreError::InvalidConfig(format!(
                    "band '{}' has invalid range {}..{} Hz",
                    spec.name, spec.low_hz, spec.high_hz
                )));
            }
            let start = (num_bins as f64 * spec.low_hz as f64 / nyquist).floor() as usize;
            let end = (num_bins as f64 * spec.high_hz as f64 / nyquist).ceil() as usize;
            let band = FrequencyBand {
                name: spec.name.clone(),
                start: start.min(num_bins),
                end: end.min(num_bins),
            };
            if band.is_empty() {
                log::debug!("Band '{}' resolves to no bins, skipping", band.name);
                continue;
            }
            bands.push(band);
        }

        Ok(Self { bands, num_bins })
    }

    /// Resolved non-empty bands
    pub fn bands(&self) -> &[FrequencyBand] {
        &self.bands
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Bin belongs to a speaker-related band
    pub fn is_high(&self, bin: usize) -> bool {
        self.bands.iter().any(|b| b.contains(bin))
    }

    /// Number of high-band bins
    pub fn high_bin_count(&self) -> usize {
        (0..self.num_bins).filter(|&k| self.is_high(k)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bins_16k_512() {
        let layout = BandLayout::new(&default_high_bands(), 16000, 512).unwrap();
        let ranges: Vec<(usize, usize)> = layout.bands().iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(ranges, vec![(1, 10), (128, 177), (208, 251)]);
        assert_eq!(layout.num_bins(), 257);
    }

    #[test]
    fn test_partition_membership() {
        let layout = BandLayout::new(&default_high_bands(), 16000, 512).unwrap();
        assert!(!layout.is_high(0));
        assert!(layout.is_high(1));
        assert!(layout.is_high(9));
        assert!(!layout.is_high(10));
        assert!(layout.is_high(176));
        assert!(!layout.is_high(177));
        assert!(!layout.is_high(256));
        assert_eq!(layout.high_bin_count(), 9 + 49 + 43);
    }

    #[test]
    fn test_degenerate_band_skipped() {
        // Entirely above Nyquist
        let specs = vec![BandSpec::new("empty", 9000.0, 10000.0)];
        let layout = BandLayout::new(&specs, 16000, 512).unwrap();
        assert!(layout.bands().is_empty());
        assert_eq!(layout.high_bin_count(), 0);
    }

    #[test]
    fn test_band_clamped_to_nyquist() {
        let specs = vec![BandSpec::new("top", 7000.0, 12000.0)];
        let layout = BandLayout::new(&specs, 16000, 512).unwrap();
        assert_eq!(layout.bands()[0].end, 257);
    }

    #[test]
    fn test_invalid_band() {
        let specs = vec![BandSpec::new("reversed", 500.0, 100.0)];
        assert!(BandLayout::new(&specs, 16000, 512).is_err());
        assert!(BandLayout::new(&default_high_bands(), 0, 512).is_err());
    }
}
