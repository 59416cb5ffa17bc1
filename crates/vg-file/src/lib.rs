//! vg-file: Audio and dataset file I/O
//!
//! Provides:
//! - Mono WAV reading/writing (via hound), segment reads with zero padding
//! - FLAC, MP3, OGG Vorbis, AIFF decoding (via symphonia)
//! - `[path, frames]` metadata lists (`filtered.json` / `raw.json`)
//! - Parallel corpus scanning into train/test metadata

mod audio;
mod error;
mod metadata;
pub mod scan;

pub use audio::*;
pub use error::*;
pub use metadata::*;
pub use scan::{create_meta, find_speakers, scan_speakers, write_split, ScanConfig, ScanOutcome, SplitMeta};
