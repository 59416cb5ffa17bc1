//! Run configuration
//!
//! One statically-typed structure covering data, model, optimizer, solver,
//! masking and inference options. Every field has a default so partial
//! YAML/JSON files are accepted; `validate` runs eagerly on load.

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};
use vg_dsp::GriffinLimConfig;
use vg_restore::AfpmConfig;

use crate::error::{MlError, MlResult};

/// Dataset locations and segmenting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Training metadata directory (`filtered.json` + `raw.json`)
    pub train_dir: PathBuf,
    /// Validation metadata directory
    pub valid_dir: Option<PathBuf>,
    /// Test metadata directory (full-file enhancement + metrics)
    pub test_dir: Option<PathBuf>,
    /// Low-resolution sample rate
    pub lr_sr: u32,
    /// High-resolution sample rate
    pub hr_sr: u32,
    /// Segment length (seconds); `None` uses whole files
    pub segment_seconds: Option<f32>,
    /// Hop between segments (seconds)
    pub stride_seconds: f32,
    /// Keep trailing partial segments, zero-padded
    pub pad: bool,
    /// Match low-res length to the high-res sample count
    pub upsample: bool,
    /// Items per batch
    pub batch_size: usize,
    /// Batch assembly threads
    pub num_workers: usize,
    /// Shuffle training order each epoch
    pub shuffle: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("egs/tr"),
            valid_dir: None,
            test_dir: None,
            lr_sr: 16000,
            hr_sr: 16000,
            segment_seconds: Some(2.0),
            stride_seconds: 2.0,
            pad: true,
            upsample: true,
            batch_size: 16,
            num_workers: num_cpus::get().min(8),
            shuffle: true,
        }
    }
}

/// Reference restoration model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Channels of the hidden convolutions
    pub hidden_channels: usize,
    /// Number of hidden convolutions
    pub depth: usize,
    /// Square kernel size (odd)
    pub kernel_size: usize,
    /// Train a discriminator alongside the generator
    pub adversarial: bool,
    /// Channels of the discriminator convolutions
    pub discriminator_channels: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_channels: 16,
            depth: 3,
            kernel_size: 3,
            adversarial: false,
            discriminator_channels: 16,
        }
    }
}

/// Adam hyper-parameters (shared by generator and discriminator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            lr: 3e-4,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

/// Training loop, checkpointing and evaluation cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub epochs: usize,
    /// Run validation passes
    pub cross_valid: bool,
    pub cross_valid_every: usize,
    pub eval_every: usize,
    /// Write a checkpoint after every epoch
    pub checkpoint: bool,
    pub checkpoint_file: PathBuf,
    pub history_file: PathBuf,
    /// Enhanced test samples are written here
    pub samples_dir: PathBuf,
    /// Ignore an existing checkpoint
    pub restart: bool,
    /// Initialise from another run's checkpoint
    pub continue_from: Option<PathBuf>,
    /// With `continue_from`, load the best rather than the last state
    pub continue_best: bool,
    /// With `continue_from`, keep that run's history
    pub keep_history: bool,
    /// Evaluate with the best validation state when available
    pub evaluate_on_best: bool,
    /// Progress lines per epoch
    pub num_prints: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            cross_valid: true,
            cross_valid_every: 1,
            eval_every: 10,
            checkpoint: true,
            checkpoint_file: PathBuf::from("checkpoint.json"),
            history_file: PathBuf::from("history.json"),
            samples_dir: PathBuf::from("samples"),
            restart: false,
            continue_from: None,
            continue_best: false,
            keep_history: true,
            evaluate_on_best: true,
            num_prints: 5,
        }
    }
}

/// Masking presets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AfpmPresets {
    /// Applied to training and validation inputs
    pub training: AfpmConfig,
    /// Applied when enhancing audio
    pub inference: AfpmConfig,
}

impl Default for AfpmPresets {
    fn default() -> Self {
        Self {
            training: AfpmConfig::training(),
            inference: AfpmConfig::inference(),
        }
    }
}

/// Long-audio enhancement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Chunk duration (seconds); the last chunk may be shorter
    pub chunk_seconds: f32,
    /// Working sample rate of the model
    pub sample_rate: u32,
    /// Resample inputs at other rates to the working rate
    pub upsample: bool,
    /// Load the best rather than the last generator state
    pub load_best: bool,
    /// Checkpoint to load (defaults to the solver checkpoint)
    pub checkpoint: Option<PathBuf>,
    /// Phase reconstruction
    pub griffin_lim: GriffinLimConfig,
    /// Seed for the masking probe
    pub seed: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: 10.0,
            sample_rate: 16000,
            upsample: true,
            load_best: false,
            checkpoint: None,
            griffin_lim: GriffinLimConfig::default(),
            seed: 0,
        }
    }
}

/// Complete run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// `cpu`, `cuda` or `cuda:N`
    pub device: String,
    /// Seed for initialisation, shuffling and masking
    pub seed: u64,
    pub data: DataConfig,
    pub model: ModelConfig,
    pub optim: OptimConfig,
    pub solver: SolverConfig,
    pub afpm: AfpmPresets,
    pub inference: InferenceConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            seed: 2036,
            data: DataConfig::default(),
            model: ModelConfig::default(),
            optim: OptimConfig::default(),
            solver: SolverConfig::default(),
            afpm: AfpmPresets::default(),
            inference: InferenceConfig::default(),
        }
    }
}

fn config_err<T>(msg: impl Into<String>) -> MlResult<T> {
    Err(MlError::Config(msg.into()))
}

impl RunConfig {
    /// Load from YAML (`.yaml`/`.yml`) or JSON and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> MlResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| MlError::Config(format!("cannot read {}: {}", path.display(), e)))?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yml::from_str(&text)?,
            Some("json") => serde_json::from_str(&text)?,
            _ => return config_err(format!("unsupported config format: {}", path.display())),
        };

        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write as YAML
    pub fn to_yaml(&self) -> MlResult<String> {
        Ok(serde_yml::to_string(self)?)
    }

    /// Checkpoint used for inference
    pub fn inference_checkpoint(&self) -> &Path {
        self.inference
            .checkpoint
            .as_deref()
            .unwrap_or(&self.solver.checkpoint_file)
    }

    /// Segment length in low-res samples
    pub fn lr_segment(&self) -> Option<usize> {
        self.data
            .segment_seconds
            .map(|s| (s * self.data.lr_sr as f32) as usize)
    }

    /// Segment length in high-res samples
    pub fn hr_segment(&self) -> Option<usize> {
        self.data
            .segment_seconds
            .map(|s| (s * self.data.hr_sr as f32) as usize)
    }

    pub fn lr_stride(&self) -> usize {
        (self.data.stride_seconds * self.data.lr_sr as f32) as usize
    }

    pub fn hr_stride(&self) -> usize {
        (self.data.stride_seconds * self.data.hr_sr as f32) as usize
    }

    /// Resolve the compute device
    pub fn device(&self) -> MlResult<Device> {
        parse_device(&self.device)
    }

    /// Reject inconsistent or out-of-range options
    pub fn validate(&self) -> MlResult<()> {
        let data = &self.data;
        let solver = &self.solver;

        if data.lr_sr == 0 || data.hr_sr == 0 {
            return config_err("sample rates must be > 0");
        }
        if let Some(seg) = data.segment_seconds {
            if !(seg > 0.0) {
                return config_err(format!("segment_seconds must be > 0, got {}", seg));
            }
            if !(data.stride_seconds > 0.0) {
                return config_err(format!("stride_seconds must be > 0, got {}", data.stride_seconds));
            }
        }
        if data.batch_size == 0 {
            return config_err("batch_size must be > 0");
        }
        if data.num_workers == 0 {
            return config_err("num_workers must be > 0");
        }

        if solver.epochs == 0 {
            return config_err("epochs must be > 0");
        }
        if solver.cross_valid_every == 0 || solver.eval_every == 0 {
            return config_err("cross_valid_every and eval_every must be > 0");
        }
        if solver.num_prints == 0 {
            return config_err("num_prints must be > 0");
        }
        if solver.cross_valid && data.valid_dir.is_none() {
            return config_err("cross_valid is enabled but no valid_dir is configured");
        }

        if self.model.depth == 0 || self.model.hidden_channels == 0 {
            return config_err("model depth and hidden_channels must be > 0");
        }
        if self.model.kernel_size % 2 == 0 {
            return config_err(format!("kernel_size must be odd, got {}", self.model.kernel_size));
        }
        if !(self.optim.lr > 0.0) {
            return config_err(format!("learning rate must be > 0, got {}", self.optim.lr));
        }
        if !(0.0..1.0).contains(&self.optim.beta1) || !(0.0..1.0).contains(&self.optim.beta2) {
            return config_err("Adam betas must be in [0, 1)");
        }

        let (training, inference) = (&self.afpm.training, &self.afpm.inference);
        for preset in [training, inference] {
            if preset.n_fft < 16 || preset.n_fft % 2 != 0 {
                return config_err(format!("n_fft must be even and >= 16, got {}", preset.n_fft));
            }
            preset
                .validate()
                .map_err(|e| MlError::Config(format!("afpm: {}", e)))?;
        }
        if training.n_fft != inference.n_fft {
            return config_err("training and inference masking must share n_fft");
        }
        if training.sample_rate != data.lr_sr {
            return config_err(format!(
                "training masking expects {} Hz but lr_sr is {} Hz",
                training.sample_rate, data.lr_sr
            ));
        }
        if inference.sample_rate != self.inference.sample_rate {
            return config_err(format!(
                "inference masking expects {} Hz but working rate is {} Hz",
                inference.sample_rate, self.inference.sample_rate
            ));
        }

        // Test pairs are enhanced and written at the working rate
        if data.test_dir.is_some() {
            if self.inference.sample_rate != data.hr_sr {
                return config_err(format!(
                    "test set is at {} Hz (hr_sr) but the working rate is {} Hz",
                    data.hr_sr, self.inference.sample_rate
                ));
            }
            if data.lr_sr != data.hr_sr {
                return config_err(format!(
                    "test set evaluation needs lr_sr == hr_sr, got {} and {} Hz",
                    data.lr_sr, data.hr_sr
                ));
            }
        }

        if !(self.inference.chunk_seconds > 0.0) {
            return config_err(format!(
                "chunk_seconds must be > 0, got {}",
                self.inference.chunk_seconds
            ));
        }
        if !(0.0..1.0).contains(&self.inference.griffin_lim.momentum) {
            return config_err("griffin_lim momentum must be in [0, 1)");
        }

        parse_device(&self.device).map(|_| ())
    }
}

/// Parse `cpu`, `cuda` or `cuda:N`
pub fn parse_device(spec: &str) -> MlResult<Device> {
    match spec.trim() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0).map_err(|e| MlError::Device(e.to_string())),
        other => match other.strip_prefix("cuda:").map(str::parse::<usize>) {
            Some(Ok(ordinal)) => Device::new_cuda(ordinal).map_err(|e| MlError::Device(e.to_string())),
            _ => Err(MlError::Config(format!("unknown device '{}'", spec))),
        },
    }
}
