//! Audio file reading and writing
//!
//! Everything downstream works on mono `f32` at the file's own rate:
//! - WAV via hound (seekable, used for segment reads)
//! - FLAC/MP3/OGG/AIFF via symphonia (decoded whole, then sliced)
//!
//! Multichannel sources are averaged down to one channel.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{FileError, FileResult};

// ═══════════════════════════════════════════════════════════════════════════════
// FORMAT / INFO
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Flac,
    Mp3,
    Ogg,
    Aiff,
    Unknown,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "wav" | "wave" => Self::Wav,
            "flac" => Self::Flac,
            "mp3" => Self::Mp3,
            "ogg" | "oga" => Self::Ogg,
            "aif" | "aiff" => Self::Aiff,
            _ => Self::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }
}

/// Stream properties read from the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: usize,
    /// Length in sample frames (per channel)
    pub frames: u64,
}

/// Mono audio at a fixed rate
#[derive(Debug, Clone, PartialEq)]
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Peak absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }
}

/// Average interleaved frames down to one channel
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

fn ensure_exists(path: &Path) -> FileResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(FileError::NotFound(path.display().to_string()))
    }
}

/// Read stream properties without decoding samples
pub fn probe<P: AsRef<Path>>(path: P) -> FileResult<AudioInfo> {
    let path = path.as_ref();
    ensure_exists(path)?;

    if AudioFormat::from_path(path) == AudioFormat::Wav {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        return Ok(AudioInfo {
            sample_rate: spec.sample_rate,
            channels: spec.channels as usize,
            frames: reader.duration() as u64,
        });
    }

    let format = open_symphonia(path)?;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| FileError::InvalidFile("No audio track found".to_string()))?;
    let params = &track.codec_params;

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| FileError::InvalidFile("Missing sample rate".to_string()))?;
    let channels = params.channels.map(|c| c.count()).unwrap_or(1);

    let frames = match params.n_frames {
        Some(frames) => frames,
        // Length is not in the header for some streams; count by decoding
        None => read_mono(path)?.samples.len() as u64,
    };

    Ok(AudioInfo {
        sample_rate,
        channels,
        frames,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// READING
// ═══════════════════════════════════════════════════════════════════════════════

/// Read a whole file as mono
pub fn read_mono<P: AsRef<Path>>(path: P) -> FileResult<MonoAudio> {
    let path = path.as_ref();
    ensure_exists(path)?;

    if AudioFormat::from_path(path) == AudioFormat::Wav {
        let mut reader = hound::WavReader::open(path)?;
        let channels = reader.spec().channels as usize;
        let sample_rate = reader.spec().sample_rate;
        let total = reader.len() as usize;
        let interleaved = read_wav_samples(&mut reader, total)?;
        return Ok(MonoAudio::new(downmix(&interleaved, channels), sample_rate));
    }

    decode_symphonia(path)
}

/// Read `length` frames starting at `offset`, zero-padded to exactly `length`
pub fn read_segment<P: AsRef<Path>>(path: P, offset: u64, length: usize) -> FileResult<MonoAudio> {
    let path = path.as_ref();
    ensure_exists(path)?;

    if AudioFormat::from_path(path) == AudioFormat::Wav {
        let mut reader = hound::WavReader::open(path)?;
        let channels = reader.spec().channels as usize;
        let sample_rate = reader.spec().sample_rate;
        let duration = reader.duration() as u64;

        let mut samples = if offset < duration {
            let offset = u32::try_from(offset)
                .map_err(|_| FileError::InvalidFile(format!("offset {} out of range", offset)))?;
            reader.seek(offset)?;
            let interleaved = read_wav_samples(&mut reader, length * channels)?;
            downmix(&interleaved, channels)
        } else {
            Vec::new()
        };
        samples.resize(length, 0.0);
        return Ok(MonoAudio::new(samples, sample_rate));
    }

    let full = decode_symphonia(path)?;
    let start = (offset as usize).min(full.samples.len());
    let end = (start + length).min(full.samples.len());
    let mut samples = full.samples[start..end].to_vec();
    samples.resize(length, 0.0);
    Ok(MonoAudio::new(samples, full.sample_rate))
}

/// Read up to `max_samples` interleaved samples, normalized to [-1, 1)
fn read_wav_samples(
    reader: &mut hound::WavReader<BufReader<File>>,
    max_samples: usize,
) -> FileResult<Vec<f32>> {
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .take(max_samples)
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .take(max_samples)
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(samples)
}

fn open_symphonia(path: &Path) -> FileResult<Box<dyn FormatReader>> {
    let file = File::open(path).map_err(|_| FileError::NotFound(path.display().to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    Ok(probed.format)
}

/// Decode a compressed/container file with symphonia
fn decode_symphonia(path: &Path) -> FileResult<MonoAudio> {
    let mut format = open_symphonia(path)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| FileError::InvalidFile("No audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| FileError::InvalidFile("Missing sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FileError::DecodeError(e.to_string()))?;

    let mut mono = Vec::new();

    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }

                match decoder.decode(&packet) {
                    Ok(decoded) => {
                        let spec = *decoded.spec();
                        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                        buffer.copy_interleaved_ref(decoded);
                        mono.extend(downmix(buffer.samples(), spec.channels.count()));
                    }
                    Err(SymphoniaError::DecodeError(e)) => {
                        log::warn!("Skipping corrupt packet in {}: {}", path.display(), e);
                        continue;
                    }
                    Err(e) => return Err(FileError::DecodeError(e.to_string())),
                }
            }
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(FileError::DecodeError(e.to_string())),
        }
    }

    Ok(MonoAudio::new(mono, sample_rate))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WRITING
// ═══════════════════════════════════════════════════════════════════════════════

/// Write mono samples as a 32-bit float WAV
pub fn write_wav_f32<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> FileResult<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    log::debug!("Wrote {} samples to {}", samples.len(), path.as_ref().display());
    Ok(())
}

/// Write mono samples as a 16-bit PCM WAV (clamped)
pub fn write_wav_pcm16<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> FileResult<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
