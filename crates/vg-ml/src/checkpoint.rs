//! Checkpoint and history persistence
//!
//! A checkpoint is a single JSON document holding:
//! - `models`: current parameter state per model name
//! - `best`: parameter state at the lowest validation loss (optional)
//! - `optimizers`: Adam state per optimizer name
//! - `history`: one metric map per completed epoch
//!
//! Files are written to a temporary sibling and renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::{MlError, MlResult};
use crate::optim::AdamState;

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Metric name -> value for one epoch, iterated in name order
pub type EpochMetrics = BTreeMap<String, f64>;

/// Parameter name -> value for one model
pub type ModelState = BTreeMap<String, TensorState>;

/// Model name -> parameter state
pub type ModelStates = BTreeMap<String, ModelState>;

/// Dense f32 tensor snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorState {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorState {
    pub fn from_tensor(tensor: &Tensor) -> MlResult<Self> {
        Ok(Self {
            shape: tensor.dims().to_vec(),
            data: tensor.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?,
        })
    }

    pub fn to_tensor(&self, device: &Device) -> MlResult<Tensor> {
        if self.numel() != self.data.len() {
            return Err(MlError::Shape {
                expected: format!("{} values for shape {:?}", self.numel(), self.shape),
                got: self.data.len().to_string(),
            });
        }
        Ok(Tensor::from_vec(self.data.clone(), self.shape.as_slice(), device)?)
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Which model-state slot to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSlot {
    /// State after the last completed epoch
    Current,
    /// State at the lowest validation loss
    Best,
}

/// Serialized training state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub models: ModelStates,
    #[serde(default)]
    pub best: Option<ModelStates>,
    #[serde(default)]
    pub optimizers: BTreeMap<String, AdamState>,
    #[serde(default)]
    pub history: Vec<EpochMetrics>,
}

impl Checkpoint {
    pub fn new(
        models: ModelStates,
        best: Option<ModelStates>,
        optimizers: BTreeMap<String, AdamState>,
        history: Vec<EpochMetrics>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            models,
            best,
            optimizers,
            history,
        }
    }

    /// Load and check the format version
    pub fn load<P: AsRef<Path>>(path: P) -> MlResult<Self> {
        let path = path.as_ref();
        let fail = |reason: String| MlError::Checkpoint {
            path: path.to_path_buf(),
            reason,
        };

        let text = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let checkpoint: Self = serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?;

        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(fail(format!(
                "written by a newer version ({} > {})",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }
        if checkpoint.models.is_empty() {
            return Err(fail("no model states".to_string()));
        }

        log::debug!(
            "Loaded checkpoint {} ({} epochs of history)",
            path.display(),
            checkpoint.history.len()
        );
        Ok(checkpoint)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> MlResult<()> {
        write_json_atomic(path, self)
    }

    /// Model states of one slot
    pub fn model_states(&self, slot: StateSlot) -> Option<&ModelStates> {
        match slot {
            StateSlot::Current => Some(&self.models),
            StateSlot::Best => self.best.as_ref(),
        }
    }
}

/// Read a JSON history file (missing file reads as empty)
pub fn read_history<P: AsRef<Path>>(path: P) -> MlResult<Vec<EpochMetrics>> {
    read_json_or_default(path)
}

/// Rewrite the JSON history file in full
pub fn write_history<P: AsRef<Path>>(path: P, history: &[EpochMetrics]) -> MlResult<()> {
    write_json_atomic(path, &history)
}

fn read_json_or_default<T: DeserializeOwned + Default, P: AsRef<Path>>(path: P) -> MlResult<T> {
    match fs::read_to_string(path.as_ref()) {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Serialize as pretty JSON to `<path>.tmp`, then rename over `path`
pub fn write_json_atomic<T: Serialize + ?Sized, P: AsRef<Path>>(path: P, value: &T) -> MlResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let temp = temp_sibling(path);
    fs::write(&temp, json)?;
    fs::rename(&temp, path)?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
