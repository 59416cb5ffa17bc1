//! Paired low/high resolution datasets
//!
//! - `SegmentIndex`: fixed-length windows over a metadata list
//! - `PairedSegments`: two indexes checked for alignment up front
//! - `RawPairDataset`: waveform pairs with the file stem (test/enhancement)
//! - `MaskedMagnitudeDataset`: AFPM-masked low-res magnitude and clean
//!   high-res magnitude (train/valid)

use std::path::Path;

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use vg_dsp::{Stft, StftConfig};
use vg_file::{read_mono, read_pair_dir, read_segment, MetaEntry};
use vg_restore::{Afpm, AfpmConfig};

use crate::config::RunConfig;
use crate::error::{MlError, MlResult};

// ═══════════════════════════════════════════════════════════════════════════════
// SEGMENT INDEX
// ═══════════════════════════════════════════════════════════════════════════════

/// Number of windows a file of `frames` samples yields
pub fn examples_per_file(frames: u64, length: Option<usize>, stride: usize, pad: bool) -> usize {
    let Some(length) = length else {
        return 1;
    };
    let frames = frames as usize;
    if frames < length {
        return usize::from(pad);
    }
    let span = frames - length;
    if pad {
        span.div_ceil(stride) + 1
    } else {
        span / stride + 1
    }
}

/// Window index over one metadata list
#[derive(Debug, Clone)]
pub struct SegmentIndex {
    files: Vec<MetaEntry>,
    counts: Vec<usize>,
    length: Option<usize>,
    stride: usize,
    sample_rate: u32,
}

impl SegmentIndex {
    pub fn new(
        files: Vec<MetaEntry>,
        length: Option<usize>,
        stride: usize,
        pad: bool,
        sample_rate: u32,
    ) -> MlResult<Self> {
        if length.is_some() && stride == 0 {
            return Err(MlError::Config("segment stride must be > 0".into()));
        }
        let counts = files
            .iter()
            .map(|f| examples_per_file(f.frames, length, stride, pad))
            .collect();
        Ok(Self {
            files,
            counts,
            length,
            stride,
            sample_rate,
        })
    }

    /// Total number of windows
    pub fn len(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn files(&self) -> &[MetaEntry] {
        &self.files
    }

    /// File position and sample offset of a window
    pub fn locate(&self, mut index: usize) -> Option<(usize, u64)> {
        for (file, &count) in self.counts.iter().enumerate() {
            if index < count {
                return Some((file, (index * self.stride) as u64));
            }
            index -= count;
        }
        None
    }

    /// Read one window (zero-padded to the segment length)
    pub fn read(&self, index: usize) -> MlResult<(Vec<f32>, &MetaEntry)> {
        let (file, offset) = self.locate(index).ok_or_else(|| {
            MlError::Internal(format!("index {} out of range ({} windows)", index, self.len()))
        })?;
        let entry = &self.files[file];

        let audio = match self.length {
            Some(length) => read_segment(&entry.path, offset, length)?,
            None => read_mono(&entry.path)?,
        };
        if audio.sample_rate != self.sample_rate {
            return Err(MlError::SampleRate {
                path: entry.path.clone(),
                expected: self.sample_rate,
                got: audio.sample_rate,
            });
        }
        Ok((audio.samples, entry))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAIRING
// ═══════════════════════════════════════════════════════════════════════════════

fn sort_by_file_name(entries: &mut [MetaEntry]) {
    entries.sort_by(|a, b| {
        a.file_name()
            .cmp(&b.file_name())
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Low/high resolution indexes with matching windows
#[derive(Debug, Clone)]
pub struct PairedSegments {
    low: SegmentIndex,
    high: SegmentIndex,
}

impl PairedSegments {
    /// Sort both lists by file name and check they pair up
    pub fn new(mut low: Vec<MetaEntry>, mut high: Vec<MetaEntry>, config: &RunConfig) -> MlResult<Self> {
        sort_by_file_name(&mut low);
        sort_by_file_name(&mut high);

        if low.len() != high.len() {
            return Err(MlError::Alignment(format!(
                "{} low-resolution files but {} high-resolution files",
                low.len(),
                high.len()
            )));
        }
        if let Some((l, h)) = low
            .iter()
            .zip(&high)
            .find(|(l, h)| l.file_name() != h.file_name())
        {
            return Err(MlError::Alignment(format!(
                "file names differ: {} vs {}",
                l.path.display(),
                h.path.display()
            )));
        }

        let data = &config.data;
        let low = SegmentIndex::new(low, config.lr_segment(), config.lr_stride(), data.pad, data.lr_sr)?;
        let high = SegmentIndex::new(high, config.hr_segment(), config.hr_stride(), data.pad, data.hr_sr)?;

        if low.len() != high.len() {
            return Err(MlError::Alignment(format!(
                "{} low-resolution segments but {} high-resolution segments",
                low.len(),
                high.len()
            )));
        }

        Ok(Self { low, high })
    }

    /// Load `filtered.json` / `raw.json` from a metadata directory
    pub fn from_dir<P: AsRef<Path>>(dir: P, config: &RunConfig) -> MlResult<Self> {
        let (low, high) = read_pair_dir(dir.as_ref())?;
        Self::new(low, high, config)
    }

    pub fn len(&self) -> usize {
        self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paired file names, in dataset order
    pub fn file_names(&self) -> Vec<String> {
        self.low.files().iter().map(MetaEntry::file_name).collect()
    }

    fn read(&self, index: usize) -> MlResult<(Vec<f32>, Vec<f32>, String)> {
        let (low, entry) = self.low.read(index)?;
        let stem = entry.stem();
        let (high, _) = self.high.read(index)?;
        Ok((low, high, stem))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DATASET VARIANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Waveform pair
#[derive(Debug, Clone)]
pub struct RawPair {
    pub low: Vec<f32>,
    pub high: Vec<f32>,
    pub stem: String,
}

/// Waveform pairs, used for test-set enhancement
#[derive(Debug, Clone)]
pub struct RawPairDataset {
    pairs: PairedSegments,
    upsample: bool,
}

impl RawPairDataset {
    pub fn new(pairs: PairedSegments, upsample: bool) -> Self {
        Self { pairs, upsample }
    }

    pub fn from_dir<P: AsRef<Path>>(dir: P, config: &RunConfig) -> MlResult<Self> {
        Ok(Self::new(PairedSegments::from_dir(dir, config)?, config.data.upsample))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, index: usize) -> MlResult<RawPair> {
        let (mut low, high, stem) = self.pairs.read(index)?;
        if self.upsample {
            // Length match only; no resampling
            low.resize(high.len(), 0.0);
        }
        Ok(RawPair { low, high, stem })
    }
}

/// Masked input and clean target magnitudes, `[bins, frames]`
#[derive(Debug, Clone)]
pub struct MagnitudePair {
    pub masked: Array2<f32>,
    pub clean: Array2<f32>,
}

/// Per-item seed: distinct for every `(seed, epoch, index)`
pub fn item_seed(seed: u64, epoch: usize, index: usize) -> u64 {
    seed ^ (epoch as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_add(1).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

/// AFPM-masked training pairs
#[derive(Debug)]
pub struct MaskedMagnitudeDataset {
    raw: RawPairDataset,
    afpm: Afpm,
    stft: Stft,
    seed: u64,
}

impl MaskedMagnitudeDataset {
    pub fn new(raw: RawPairDataset, afpm: AfpmConfig, seed: u64) -> MlResult<Self> {
        let stft = Stft::new(StftConfig::new(afpm.n_fft))?;
        let afpm = Afpm::new(afpm)?;
        Ok(Self {
            raw,
            afpm,
            stft,
            seed,
        })
    }

    /// Build from a metadata directory with the training masking preset
    pub fn from_dir<P: AsRef<Path>>(dir: P, config: &RunConfig) -> MlResult<Self> {
        Self::new(
            RawPairDataset::from_dir(dir, config)?,
            config.afpm.training.clone(),
            config.seed,
        )
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Masked/clean pair for `index`; masking randomness depends only on
    /// `(seed, epoch, index)`
    pub fn get(&self, index: usize, epoch: usize) -> MlResult<MagnitudePair> {
        let pair = self.raw.get(index)?;
        let mut rng = ChaCha8Rng::seed_from_u64(item_seed(self.seed, epoch, index));
        let masked = self.afpm.apply(&pair.low, &mut rng)?.magnitude;
        let clean = self.stft.magnitude(&pair.high)?;
        Ok(MagnitudePair { masked, clean })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_examples_per_file() {
        // No segmenting: one example per file
        assert_eq!(examples_per_file(123, None, 1, false), 1);
        // Short files
        assert_eq!(examples_per_file(10, Some(16), 16, true), 1);
        assert_eq!(examples_per_file(10, Some(16), 16, false), 0);
        // Exact fit
        assert_eq!(examples_per_file(16, Some(16), 8, true), 1);
        // Partial tail kept only with padding
        assert_eq!(examples_per_file(40, Some(16), 16, true), 3);
        assert_eq!(examples_per_file(40, Some(16), 16, false), 2);
    }

    #[test]
    fn test_locate() {
        let files = vec![MetaEntry::new("a.wav", 40), MetaEntry::new("b.wav", 16)];
        let index = SegmentIndex::new(files, Some(16), 16, true, 16000).unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.locate(0), Some((0, 0)));
        assert_eq!(index.locate(2), Some((0, 32)));
        assert_eq!(index.locate(3), Some((1, 0)));
        assert_eq!(index.locate(4), None);
    }

    #[test]
    fn test_item_seed_varies() {
        let a = item_seed(1, 0, 0);
        assert_ne!(a, item_seed(1, 1, 0));
        assert_ne!(a, item_seed(1, 0, 1));
        assert_ne!(item_seed(1, 1, 2), item_seed(1, 2, 1));
        assert_eq!(a, item_seed(1, 0, 0));
    }

    #[test]
    fn test_count_mismatch() {
        let config = RunConfig::default();
        let low = vec![MetaEntry::new("a.wav", 32000)];
        let high = vec![];
        assert!(matches!(
            PairedSegments::new(low, high, &config),
            Err(MlError::Alignment(_))
        ));
    }

    #[test]
    fn test_sorts_before_pairing() {
        let config = RunConfig::default();
        let low = vec![MetaEntry::new("lr/b.wav", 32000), MetaEntry::new("lr/a.wav", 32000)];
        let high = vec![MetaEntry::new("hr/a.wav", 32000), MetaEntry::new("hr/b.wav", 32000)];
        let pairs = PairedSegments::new(low, high, &config).unwrap();
        assert_eq!(pairs.file_names(), vec!["a.wav", "b.wav"]);
    }

    #[test]
    fn test_segment_total_mismatch() {
        let config = RunConfig::default();
        let low = vec![MetaEntry::new("lr/a.wav", 32000)];
        let high = vec![MetaEntry::new("hr/a.wav", 96000)];
        assert!(matches!(
            PairedSegments::new(low, high, &config),
            Err(MlError::Alignment(_))
        ));
    }
}
