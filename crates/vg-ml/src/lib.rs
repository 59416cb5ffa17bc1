//! vg-ml: Restoration training, inference and evaluation
//!
//! Built on candle:
//! - `RestorationModel` / `AdversarialCritic` interfaces with small
//!   convolutional reference models
//! - Paired datasets (AFPM-masked low-res input, clean high-res target)
//! - `Solver`: epoch loop with cross-validation, best-state tracking,
//!   test-set evaluation and JSON checkpoints that resume exactly
//! - `Enhancer`: chunked long-audio enhancement with Griffin-Lim phase
//!   reconstruction
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vg_ml::{RunConfig, Solver};
//!
//! let config = RunConfig::from_file("conf/train.yaml")?;
//! let mut solver = Solver::from_config(config)?;
//! let history = solver.train()?;
//! ```

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod distrib;
pub mod enhance;
mod error;
pub mod evaluate;
pub mod loader;
pub mod model;
pub mod optim;
pub mod solver;

pub use checkpoint::{Checkpoint, EpochMetrics, ModelState, ModelStates, StateSlot, TensorState};
pub use config::{
    parse_device, AfpmPresets, DataConfig, InferenceConfig, ModelConfig, OptimConfig, RunConfig,
    SolverConfig,
};
pub use dataset::{MaskedMagnitudeDataset, PairedSegments, RawPairDataset, SegmentIndex};
pub use distrib::{Collective, SingleProcess};
pub use enhance::{chunk_bounds, enhance_file, predict, resample, Enhancer};
pub use error::{MlError, MlResult};
pub use evaluate::EvaluationScores;
pub use model::{AdversarialCritic, ModelSet, RestorationModel, SpectralDiscriminator, SpectralRestorer};
pub use optim::{Adam, AdamState};
pub use solver::{Solver, SolverData, SolverState};
