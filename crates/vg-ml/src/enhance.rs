//! Long-audio enhancement
//!
//! Pipeline per file:
//! 1. Resample to the working rate (rubato) when enabled
//! 2. Split into fixed-duration chunks; the last one is shorter, never padded
//! 3. Per chunk: AFPM (inference preset) -> restoration model
//! 4. Concatenate restored magnitudes along frames
//! 5. Zero-fill dropped top bins, then Griffin-Lim back to a waveform

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use ndarray::{concatenate, s, Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rubato::{FftFixedIn, Resampler};
use vg_dsp::{GriffinLim, GriffinLimConfig, Stft, StftConfig};
use vg_file::{read_mono, write_wav_f32, AudioFormat};
use vg_restore::{Afpm, AfpmConfig};

use crate::checkpoint::{Checkpoint, StateSlot};
use crate::config::RunConfig;
use crate::error::{MlError, MlResult};
use crate::model::{ModelSet, RestorationModel, GENERATOR};

/// Resampler input block size
const RESAMPLE_CHUNK: usize = 1024;

/// `[start, end)` sample ranges of consecutive chunks
pub fn chunk_bounds(len: usize, chunk_len: usize) -> Vec<(usize, usize)> {
    if chunk_len == 0 {
        return if len == 0 { Vec::new() } else { vec![(0, len)] };
    }
    (0..len.div_ceil(chunk_len))
        .map(|i| (i * chunk_len, ((i + 1) * chunk_len).min(len)))
        .collect()
}

/// Sample-rate conversion, output length `round(len * to / from)`
pub fn resample(samples: &[f32], from: u32, to: u32) -> MlResult<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let err = |e: &dyn std::fmt::Display| MlError::Resample(e.to_string());

    let mut resampler =
        FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1).map_err(|e| err(&e))?;
    let expected = (samples.len() as f64 * to as f64 / from as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay);

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= samples.len() {
        let next = resampler.input_frames_next();
        let block = resampler
            .process(&[&samples[pos..pos + next]], None)
            .map_err(|e| err(&e))?;
        out.extend_from_slice(&block[0]);
        pos += next;
    }
    if pos < samples.len() {
        let block = resampler
            .process_partial(Some(&[&samples[pos..]][..]), None)
            .map_err(|e| err(&e))?;
        out.extend_from_slice(&block[0]);
    }
    // Flush the filter tail
    while out.len() < expected + delay {
        let block = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| err(&e))?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    out.drain(..delay.min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}

fn to_array(tensor: &Tensor) -> MlResult<Array2<f32>> {
    let (_, _, bins, frames) = tensor.dims4()?;
    let data = tensor.flatten_all()?.to_vec1::<f32>()?;
    Array2::from_shape_vec((bins, frames), data).map_err(|e| MlError::Shape {
        expected: format!("[1, 1, {}, {}]", bins, frames),
        got: e.to_string(),
    })
}

/// Chunked AFPM -> model -> Griffin-Lim enhancer
#[derive(Debug)]
pub struct Enhancer {
    afpm: Afpm,
    griffin_lim: GriffinLim,
    chunk_len: usize,
    sample_rate: u32,
    seed: u64,
}

impl Enhancer {
    pub fn new(
        afpm: AfpmConfig,
        griffin_lim: GriffinLimConfig,
        chunk_seconds: f32,
        seed: u64,
    ) -> MlResult<Self> {
        let sample_rate = afpm.sample_rate;
        let stft = Stft::new(StftConfig::new(afpm.n_fft))?;
        let chunk_len = (chunk_seconds * sample_rate as f32) as usize;
        if chunk_len == 0 {
            return Err(MlError::Config(format!("chunk of {} s is empty", chunk_seconds)));
        }
        Ok(Self {
            afpm: Afpm::new(afpm)?,
            griffin_lim: GriffinLim::new(stft, griffin_lim)?,
            chunk_len,
            sample_rate,
            seed,
        })
    }

    pub fn from_config(config: &RunConfig) -> MlResult<Self> {
        let inference = &config.inference;
        Self::new(
            config.afpm.inference.clone(),
            inference.griffin_lim.clone(),
            inference.chunk_seconds,
            inference.seed,
        )
    }

    /// Working sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Restored magnitude of a whole waveform, `[n_fft/2 + 1, frames]`
    pub fn restore_magnitude(
        &self,
        model: &dyn RestorationModel,
        waveform: &[f32],
        device: &Device,
    ) -> MlResult<Array2<f32>> {
        let n_fft = self.afpm.config().n_fft;
        let n_bins = n_fft / 2 + 1;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let mut restored = Vec::new();
        for (start, end) in chunk_bounds(waveform.len(), self.chunk_len) {
            // The tail chunk is masked as is, without padding
            let masked = self.afpm.apply(&waveform[start..end], &mut rng)?.magnitude;
            let (bins, frames) = masked.dim();
            let data: Vec<f32> = masked.iter().copied().collect();
            let input = Tensor::from_vec(data, (1, 1, bins, frames), device)?;
            let output = to_array(&model.forward(&input)?)?;

            if output.nrows() > n_bins || output.ncols() != frames {
                return Err(MlError::Shape {
                    expected: format!("[<= {}, {}]", n_bins, frames),
                    got: format!("{:?}", output.dim()),
                });
            }
            restored.push(output);
        }

        let views: Vec<_> = restored.iter().map(|a| a.view()).collect();
        let joined = concatenate(Axis(1), &views).map_err(|e| MlError::Shape {
            expected: "chunks with equal bin counts".into(),
            got: e.to_string(),
        })?;

        let mut full = Array2::zeros((n_bins, joined.ncols()));
        full.slice_mut(s![..joined.nrows(), ..]).assign(&joined);
        Ok(full)
    }

    /// Enhance a waveform at the working rate; output has the input length
    pub fn enhance(
        &self,
        model: &dyn RestorationModel,
        waveform: &[f32],
        device: &Device,
    ) -> MlResult<Vec<f32>> {
        if waveform.is_empty() {
            return Ok(Vec::new());
        }
        let magnitude = self.restore_magnitude(model, waveform, device)?;
        let mut out = self.griffin_lim.reconstruct(&magnitude)?;
        out.resize(waveform.len(), 0.0);
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PREDICT
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio files under `input` (a file or a directory, not recursive), sorted
fn collect_inputs(input: &Path) -> MlResult<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = fs::read_dir(input)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && AudioFormat::from_path(p) != AudioFormat::Unknown)
        .collect();
    files.sort();
    Ok(files)
}

/// Enhance one file into `<output_dir>/<stem>_pr.wav`
pub fn enhance_file(
    enhancer: &Enhancer,
    models: &ModelSet,
    input: &Path,
    output_dir: &Path,
    allow_resample: bool,
) -> MlResult<PathBuf> {
    let audio = read_mono(input)?;
    let target = enhancer.sample_rate();

    let samples = if audio.sample_rate == target {
        audio.samples
    } else if allow_resample {
        log::debug!("Resampling {} from {} Hz to {} Hz", input.display(), audio.sample_rate, target);
        resample(&audio.samples, audio.sample_rate, target)?
    } else {
        return Err(MlError::SampleRate {
            path: input.to_path_buf(),
            expected: target,
            got: audio.sample_rate,
        });
    };

    let enhanced = enhancer.enhance(models.generator(), &samples, models.device())?;

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    fs::create_dir_all(output_dir)?;
    let out_path = output_dir.join(format!("{}_pr.wav", stem));
    write_wav_f32(&out_path, &enhanced, target)?;
    Ok(out_path)
}

/// Load the generator from a checkpoint and enhance a file or directory
pub fn predict(config: &RunConfig, input: &Path, output_dir: &Path) -> MlResult<Vec<PathBuf>> {
    let device = config.device()?;
    let models = ModelSet::build(&config.model, config.seed, &device)?;

    let ckpt_path = config.inference_checkpoint();
    let checkpoint = Checkpoint::load(ckpt_path)?;
    let slot = if config.inference.load_best {
        StateSlot::Best
    } else {
        StateSlot::Current
    };
    let state = checkpoint
        .model_states(slot)
        .and_then(|states| states.get(GENERATOR))
        .ok_or_else(|| MlError::Checkpoint {
            path: ckpt_path.to_path_buf(),
            reason: format!("no {:?} generator state", slot),
        })?;
    models.load_generator_state(state, ckpt_path)?;

    let enhancer = Enhancer::from_config(config)?;
    let inputs = collect_inputs(input)?;
    log::info!("Enhancing {} file(s) into {}", inputs.len(), output_dir.display());

    let mut written = Vec::with_capacity(inputs.len());
    for file in &inputs {
        let path = enhance_file(&enhancer, &models, file, output_dir, config.inference.upsample)?;
        log::info!("{} -> {}", file.display(), path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Result as CandleResult;

    /// Passes the masked magnitude through, minus the top bin
    struct Identity;

    impl RestorationModel for Identity {
        fn forward(&self, masked: &Tensor) -> CandleResult<Tensor> {
            let (_, _, bins, _) = masked.dims4()?;
            masked.narrow(2, 0, bins - 1)
        }
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_chunk_bounds_exact_multiple() {
        assert_eq!(chunk_bounds(30, 10), vec![(0, 10), (10, 20), (20, 30)]);
    }

    #[test]
    fn test_chunk_bounds_short_tail() {
        assert_eq!(chunk_bounds(25, 10), vec![(0, 10), (10, 20), (20, 25)]);
        assert_eq!(chunk_bounds(5, 10), vec![(0, 5)]);
        assert!(chunk_bounds(0, 10).is_empty());
    }

    #[test]
    fn test_resample_length() {
        let input = tone(16000);
        assert_eq!(resample(&input, 16000, 8000).unwrap().len(), 8000);
        assert_eq!(resample(&input, 16000, 22050).unwrap().len(), 22050);
        assert_eq!(resample(&input, 16000, 16000).unwrap(), input);
    }

    #[test]
    fn test_enhance_concatenates_chunks() {
        let enhancer = Enhancer::new(
            AfpmConfig::inference(),
            GriffinLimConfig {
                iterations: 4,
                ..Default::default()
            },
            0.5,
            0,
        )
        .unwrap();
        // Two full chunks and a tail shorter than n_fft / 2
        let wave = tone(16000 + 100);
        let magnitude = enhancer.restore_magnitude(&Identity, &wave, &Device::Cpu).unwrap();
        let frames_per_chunk = 1 + 8000 / 128;
        assert_eq!(magnitude.nrows(), 257);
        assert_eq!(magnitude.ncols(), 2 * frames_per_chunk + (1 + 100 / 128));
        assert!(magnitude.row(256).iter().all(|&m| m == 0.0));

        let out = enhancer.enhance(&Identity, &wave, &Device::Cpu).unwrap();
        assert_eq!(out.len(), wave.len());
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_collect_inputs_filters_audio() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.wav"), b"").unwrap();
        fs::write(dir.path().join("a.flac"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        let files = collect_inputs(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["a.flac", "b.wav"]);
    }
}
