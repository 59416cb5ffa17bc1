//! Corpus scanning
//!
//! Builds metadata lists from a speaker-organised corpus laid out as
//! `<data_dir>/<subset>/<speaker>/<chapter>/*.wav`. Speakers are split
//! 90/10 (sorted order) into training and test lists, and scanned in
//! parallel with one task per speaker.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::audio::{probe, AudioFormat};
use crate::metadata::{write_meta, MetaEntry};
use crate::{FileError, FileResult};

/// Scan configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Fraction of speakers assigned to the training list
    pub train_ratio: f64,
    /// Maximum entries per list
    pub limit: Option<usize>,
    /// Worker threads (defaults to the CPU count)
    pub num_threads: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            train_ratio: 0.9,
            limit: None,
            num_threads: num_cpus::get(),
        }
    }
}

impl ScanConfig {
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }
}

/// Result of scanning one group of speakers
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub entries: Vec<MetaEntry>,
    /// Files that could not be probed
    pub failures: usize,
}

/// Training and test lists
#[derive(Debug, Clone, Default)]
pub struct SplitMeta {
    pub train: ScanOutcome,
    pub test: ScanOutcome,
}

/// Sorted speaker directories (`<data_dir>/<subset>/<speaker>`)
pub fn find_speakers<P: AsRef<Path>>(data_dir: P) -> FileResult<Vec<PathBuf>> {
    let data_dir = data_dir.as_ref();
    if !data_dir.is_dir() {
        return Err(FileError::NotFound(data_dir.display().to_string()));
    }

    let mut speakers = Vec::new();
    for subset in fs::read_dir(data_dir)? {
        let subset = subset?.path();
        if !subset.is_dir() {
            continue;
        }
        for speaker in fs::read_dir(&subset)? {
            let speaker = speaker?.path();
            if speaker.is_dir() {
                speakers.push(speaker);
            }
        }
    }

    speakers.sort();
    Ok(speakers)
}

/// WAV files one chapter level below a speaker directory
fn speaker_files(speaker: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(speaker)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| AudioFormat::from_path(p) == AudioFormat::Wav)
        .collect();
    files.sort();
    files
}

/// Probe every file of the given speakers
///
/// The limit is checked against a shared counter, so workers may overshoot
/// it slightly; the merged list is truncated afterwards.
pub fn scan_speakers(speakers: &[PathBuf], limit: Option<usize>, num_threads: usize) -> FileResult<ScanOutcome> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.max(1))
        .build()
        .map_err(|e| FileError::ScanError(e.to_string()))?;

    let collected = AtomicUsize::new(0);
    let failures = AtomicUsize::new(0);
    let reached = |count: usize| limit.is_some_and(|l| count >= l);

    let per_speaker: Vec<Vec<MetaEntry>> = pool.install(|| {
        speakers
            .par_iter()
            .map(|speaker| {
                let mut entries = Vec::new();
                if reached(collected.load(Ordering::Relaxed)) {
                    return entries;
                }
                for file in speaker_files(speaker) {
                    if reached(collected.load(Ordering::Relaxed)) {
                        break;
                    }
                    match probe(&file) {
                        Ok(info) => {
                            entries.push(MetaEntry::new(file, info.frames));
                            collected.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            log::warn!("Error processing {}: {}", file.display(), e);
                            failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                entries
            })
            .collect()
    });

    let mut entries: Vec<MetaEntry> = per_speaker.into_iter().flatten().collect();
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    Ok(ScanOutcome {
        entries,
        failures: failures.into_inner(),
    })
}

/// Split speakers and scan both halves
pub fn create_meta<P: AsRef<Path>>(data_dir: P, config: &ScanConfig) -> FileResult<SplitMeta> {
    let data_dir = data_dir.as_ref();
    let speakers = find_speakers(data_dir)?;
    if speakers.is_empty() {
        return Err(FileError::ScanError(format!(
            "No speakers found in {}",
            data_dir.display()
        )));
    }

    let split = (speakers.len() as f64 * config.train_ratio) as usize;
    let (train_speakers, test_speakers) = speakers.split_at(split);

    log::info!("Found {} speakers total", speakers.len());
    log::info!("Using {} for training", train_speakers.len());
    log::info!("Using {} for testing", test_speakers.len());

    let train = scan_speakers(train_speakers, config.limit, config.num_threads)?;
    let test = scan_speakers(test_speakers, config.limit, config.num_threads)?;

    let failures = train.failures + test.failures;
    if failures > 0 {
        log::warn!("{} files could not be read and were skipped", failures);
    }

    Ok(SplitMeta { train, test })
}

/// Write `tr/<name>.json` and `val/<name>.json` under `target_dir`
pub fn write_split<P: AsRef<Path>>(target_dir: P, json_name: &str, split: &SplitMeta) -> FileResult<()> {
    let target_dir = target_dir.as_ref();
    let file_name = format!("{}.json", json_name);

    write_meta(target_dir.join("tr").join(&file_name), &split.train.entries)?;
    write_meta(target_dir.join("val").join(&file_name), &split.test.entries)?;

    log::info!("Metadata generation complete. Saved to {}", target_dir.display());
    Ok(())
}
