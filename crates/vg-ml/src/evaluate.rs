//! Test-set evaluation
//!
//! Enhanced predictions are written next to their references as
//! `<stem>_lr.wav`, `<stem>_hr.wav` and `<stem>_pr.wav`; metrics are then
//! computed from the saved files so they match what a listener gets.

use std::fs;
use std::path::{Path, PathBuf};

use vg_dsp::{lsd, segmental_snr};
use vg_file::{read_mono, write_wav_f32};

use crate::dataset::RawPairDataset;
use crate::enhance::Enhancer;
use crate::error::{MlError, MlResult};
use crate::model::ModelSet;

/// Frame length of the segmental SNR quality score
const QUALITY_FRAME: usize = 512;

/// Mean objective scores over the test set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationScores {
    /// Log-spectral distance (lower is better)
    pub lsd: f64,
    /// Segmental SNR in dB (higher is better)
    pub quality: f64,
    pub count: usize,
}

fn sample_path(dir: &Path, stem: &str, kind: &str) -> PathBuf {
    dir.join(format!("{}_{}.wav", stem, kind))
}

/// Write the low-res input, high-res reference and prediction of one item
pub fn write_samples(
    dir: &Path,
    stem: &str,
    lr: &[f32],
    hr: &[f32],
    pr: &[f32],
    sample_rate: u32,
) -> MlResult<()> {
    fs::create_dir_all(dir)?;
    write_wav_f32(sample_path(dir, stem, "lr"), lr, sample_rate)?;
    write_wav_f32(sample_path(dir, stem, "hr"), hr, sample_rate)?;
    write_wav_f32(sample_path(dir, stem, "pr"), pr, sample_rate)?;
    Ok(())
}

/// Score saved `<stem>_pr.wav` files against `<stem>_hr.wav`
pub fn evaluate_samples(dir: &Path, stems: &[String]) -> MlResult<EvaluationScores> {
    if stems.is_empty() {
        return Err(MlError::Config("no samples to evaluate".into()));
    }

    let mut total_lsd = 0.0;
    let mut total_quality = 0.0;
    for stem in stems {
        let hr = read_mono(sample_path(dir, stem, "hr"))?;
        let pr = read_mono(sample_path(dir, stem, "pr"))?;
        total_lsd += lsd(&hr.samples, &pr.samples)?;
        total_quality += segmental_snr(&hr.samples, &pr.samples, QUALITY_FRAME)?;
    }

    let count = stems.len();
    Ok(EvaluationScores {
        lsd: total_lsd / count as f64,
        quality: total_quality / count as f64,
        count,
    })
}

/// Enhance every test item with the generator currently loaded, save the
/// samples and score them
pub fn evaluate(
    models: &ModelSet,
    dataset: &RawPairDataset,
    enhancer: &Enhancer,
    samples_dir: &Path,
) -> MlResult<EvaluationScores> {
    let sample_rate = enhancer.sample_rate();
    let mut stems = Vec::with_capacity(dataset.len());

    for index in 0..dataset.len() {
        let pair = dataset.get(index)?;
        let mut pr = enhancer.enhance(models.generator(), &pair.low, models.device())?;
        pr.resize(pair.high.len(), 0.0);

        // Segmented sets repeat stems; keep each window apart
        let stem = if stems.contains(&pair.stem) {
            format!("{}_{}", pair.stem, index)
        } else {
            pair.stem.clone()
        };
        write_samples(samples_dir, &stem, &pair.low, &pair.high, &pr, sample_rate)?;
        stems.push(stem);
    }

    log::debug!("Wrote {} enhanced samples to {}", stems.len(), samples_dir.display());
    evaluate_samples(samples_dir, &stems)
}
