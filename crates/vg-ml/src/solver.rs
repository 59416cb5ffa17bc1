//! Training loop
//!
//! Epoch state machine:
//! `Resuming -> (Training -> [CrossValidating] -> [Evaluating] -> Checkpointing)* -> Done`
//!
//! - Training: L1 on magnitudes (x100), gradient all-reduce, Adam step;
//!   adversarial mode adds a discriminator step with its own optimizer
//! - CrossValidating: same loss without updates, tracks the best state
//! - Evaluating: enhances the test set with the best (or current)
//!   generator and scores the saved samples
//! - Checkpointing: primary rank rewrites history and checkpoint

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use candle_core::{Device, Tensor};
use candle_nn::Optimizer;

use crate::checkpoint::{write_history, Checkpoint, EpochMetrics, ModelStates, StateSlot};
use crate::config::RunConfig;
use crate::dataset::{MaskedMagnitudeDataset, RawPairDataset};
use crate::distrib::{Collective, SingleProcess};
use crate::enhance::Enhancer;
use crate::error::{MlError, MlResult};
use crate::evaluate::{evaluate, EvaluationScores};
use crate::loader::{Batch, BatchLoader};
use crate::model::{ModelSet, GENERATOR};
use crate::optim::Adam;

/// Optimizer name of the generator
pub const OPTIMIZER: &str = "optimizer";
/// Optimizer name of the discriminator
pub const DISC_OPTIMIZER: &str = "disc_optimizer";

/// Scale applied to the L1 magnitude loss
const L1_WEIGHT: f64 = 100.0;

// Metric keys
pub const TOTAL_LOSS: &str = "total_loss";
pub const GENERATOR_L1_LOSS: &str = "generator_l1_loss";
pub const DISCRIMINATOR_LOSS: &str = "discriminator_loss";
pub const EVALUATION_LOSS: &str = "evaluation_loss";
pub const VALID_TOTAL_LOSS: &str = "valid_total_loss";
pub const VALID_GENERATOR_L1_LOSS: &str = "valid_generator_l1_loss";
pub const VALID_EVALUATION_LOSS: &str = "valid_evaluation_loss";
pub const BEST_LOSS: &str = "best_loss";
pub const LSD: &str = "lsd";
pub const QUALITY: &str = "quality";

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Solver phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Resuming,
    Training,
    CrossValidating,
    Evaluating,
    Checkpointing,
    Done,
}

impl Default for SolverState {
    fn default() -> Self {
        Self::Resuming
    }
}

/// Datasets driven by the solver
#[derive(Debug)]
pub struct SolverData {
    pub train: MaskedMagnitudeDataset,
    pub valid: Option<MaskedMagnitudeDataset>,
    pub test: Option<RawPairDataset>,
}

impl SolverData {
    /// Train/valid windows from the metadata directories; the test set uses
    /// whole files
    pub fn from_config(config: &RunConfig) -> MlResult<Self> {
        let data = &config.data;
        let train = MaskedMagnitudeDataset::from_dir(&data.train_dir, config)?;
        let valid = data
            .valid_dir
            .as_ref()
            .map(|dir| MaskedMagnitudeDataset::from_dir(dir, config))
            .transpose()?;

        let mut whole = config.clone();
        whole.data.segment_seconds = None;
        let test = data
            .test_dir
            .as_ref()
            .map(|dir| RawPairDataset::from_dir(dir, &whole))
            .transpose()?;

        log::info!(
            "Datasets: {} train, {} valid, {} test",
            train.len(),
            valid.as_ref().map_or(0, |v| v.len()),
            test.as_ref().map_or(0, |t| t.len())
        );
        Ok(Self { train, valid, test })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROGRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// Logs a fixed number of updates per pass
struct LogProgress {
    name: String,
    total: usize,
    every: usize,
    start: Instant,
}

impl LogProgress {
    fn new(name: String, total: usize, updates: usize) -> Self {
        Self {
            name,
            total,
            every: (total / updates.max(1)).max(1),
            start: Instant::now(),
        }
    }

    fn update(&self, index: usize, loss: f64) {
        let done = index + 1;
        if done % self.every != 0 && done != self.total {
            return;
        }
        let elapsed = self.start.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
        log::info!(
            "{} | {}/{} | {:.1} it/s | total_loss {:.5}",
            self.name,
            done,
            self.total,
            rate,
            loss
        );
    }
}

fn format_metrics(metrics: &EpochMetrics) -> String {
    metrics
        .iter()
        .map(|(k, v)| format!("{} {:.5}", k, v))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// History is stored as JSON, which has no NaN or infinity
fn check_finite(epoch: usize, metrics: &EpochMetrics) -> MlResult<()> {
    match metrics.iter().find(|(_, v)| !v.is_finite()) {
        Some((metric, &value)) => Err(MlError::NonFinite {
            epoch: epoch + 1,
            metric: metric.clone(),
            value,
        }),
        None => Ok(()),
    }
}

/// Restored magnitude, cropped target and scaled L1 loss of a batch
fn l1_loss(models: &ModelSet, batch: &Batch) -> MlResult<(Tensor, Tensor, Tensor)> {
    let restored = models.generator().forward(&batch.masked)?;
    let (b, c, bins_out, frames_out) = restored.dims4()?;
    let (tb, tc, bins, frames) = batch.clean.dims4()?;

    if b != tb || c != tc || frames_out != frames || bins_out > bins {
        return Err(MlError::Shape {
            expected: format!("[{}, {}, <= {}, {}]", tb, tc, bins, frames),
            got: format!("{:?}", restored.dims()),
        });
    }

    let target = batch.clean.narrow(2, 0, bins_out)?;
    let loss = (&restored - &target)?.abs()?.mean_all()?.affine(L1_WEIGHT, 0.0)?;
    Ok((restored, target, loss))
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOLVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Epoch scheduler with checkpoint/resume
pub struct Solver {
    config: RunConfig,
    models: ModelSet,
    optimizer: Adam,
    disc_optimizer: Option<Adam>,
    data: SolverData,
    enhancer: Enhancer,
    collective: Box<dyn Collective>,
    device: Device,
    history: Vec<EpochMetrics>,
    best_states: Option<ModelStates>,
    state: SolverState,
}

impl Solver {
    pub fn new(
        config: RunConfig,
        models: ModelSet,
        data: SolverData,
        collective: Box<dyn Collective>,
    ) -> MlResult<Self> {
        let optimizer = Adam::from_varmap(models.generator_vars(), config.optim.clone())?;
        let disc_optimizer = models
            .discriminator_vars()
            .map(|vars| Adam::from_varmap(vars, config.optim.clone()))
            .transpose()?;
        let enhancer = Enhancer::from_config(&config)?;
        let device = models.device().clone();

        Ok(Self {
            config,
            models,
            optimizer,
            disc_optimizer,
            data,
            enhancer,
            collective,
            device,
            history: Vec::new(),
            best_states: None,
            state: SolverState::default(),
        })
    }

    /// Single-process solver with the reference models
    pub fn from_config(config: RunConfig) -> MlResult<Self> {
        config.validate()?;
        let device = config.device()?;
        let models = ModelSet::build(&config.model, config.seed, &device)?;
        let data = SolverData::from_config(&config)?;
        Self::new(config, models, data, Box::new(SingleProcess))
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    pub fn history(&self) -> &[EpochMetrics] {
        &self.history
    }

    pub fn best_states(&self) -> Option<&ModelStates> {
        self.best_states.as_ref()
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    fn enter(&mut self, state: SolverState) {
        log::debug!("Solver: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    // ---- Resume ----

    fn load_optimizers(&mut self, checkpoint: &Checkpoint, source: &Path) -> MlResult<()> {
        let missing = |name: &str| MlError::Checkpoint {
            path: source.to_path_buf(),
            reason: format!("no state for optimizer '{}'", name),
        };

        let state = checkpoint.optimizers.get(OPTIMIZER).ok_or_else(|| missing(OPTIMIZER))?;
        self.optimizer.import_state(state)?;

        if let Some(disc) = self.disc_optimizer.as_mut() {
            let state = checkpoint
                .optimizers
                .get(DISC_OPTIMIZER)
                .ok_or_else(|| missing(DISC_OPTIMIZER))?;
            disc.import_state(state)?;
        }
        Ok(())
    }

    /// Restore from the run's own checkpoint, or initialise from another run
    pub fn resume(&mut self) -> MlResult<()> {
        self.enter(SolverState::Resuming);
        let solver = self.config.solver.clone();
        let own = &solver.checkpoint_file;

        if solver.checkpoint && own.exists() && !solver.restart {
            log::info!("Loading checkpoint: {}", own.display());
            let checkpoint = Checkpoint::load(own)?;
            self.models.load_states(&checkpoint.models, own)?;
            self.load_optimizers(&checkpoint, own)?;
            self.history = checkpoint.history;
            self.best_states = checkpoint.best;
        } else if let Some(from) = &solver.continue_from {
            let slot = if solver.continue_best {
                StateSlot::Best
            } else {
                StateSlot::Current
            };
            log::info!("Continuing from {:?} state of {}", slot, from.display());

            let checkpoint = Checkpoint::load(from)?;
            let states = checkpoint.model_states(slot).ok_or_else(|| MlError::Checkpoint {
                path: from.clone(),
                reason: "no best state saved".to_string(),
            })?;
            self.models.load_states(states, from)?;
            if slot == StateSlot::Current {
                self.load_optimizers(&checkpoint, from)?;
            }
            if solver.keep_history {
                self.history = checkpoint.history.clone();
            }
            self.best_states = checkpoint.best.clone();
        } else if solver.restart {
            log::info!("Restart requested, starting from scratch");
        }

        for (epoch, metrics) in self.history.iter().enumerate() {
            log::info!("Epoch {} (replayed): {}", epoch + 1, format_metrics(metrics));
        }
        for (name, count) in self.models.parameter_counts()? {
            log::info!("{}: {:.3}M trainable parameters", name, count as f64 / 1e6);
        }
        Ok(())
    }

    // ---- Epochs ----

    /// One pass over the train (updates) or valid (no updates) set
    fn run_epoch(&mut self, epoch: usize, cross_valid: bool) -> MlResult<EpochMetrics> {
        let data = &self.config.data;
        let (dataset, prefix, label) = if cross_valid {
            match &self.data.valid {
                Some(valid) => (valid, "valid_", "Valid"),
                None => return Ok(EpochMetrics::new()),
            }
        } else {
            (&self.data.train, "", "Train")
        };

        let loader = BatchLoader::new(
            dataset,
            data.batch_size,
            data.shuffle && !cross_valid,
            self.config.seed,
            data.num_workers,
            self.collective.as_ref(),
        )?;
        let batches = loader.epoch_batches(epoch);
        if batches.is_empty() {
            return Err(MlError::Config(format!("{} set has no segments", label.to_lowercase())));
        }

        let progress = LogProgress::new(
            format!("{} | Epoch {}", label, epoch + 1),
            batches.len(),
            self.config.solver.num_prints,
        );
        let gen_vars = self.models.generator_vars().all_vars();
        let disc_vars = self
            .models
            .discriminator_vars()
            .map(|v| v.all_vars())
            .unwrap_or_default();

        let mut total_l1 = 0.0f64;
        let mut total_disc = 0.0f64;
        for (i, indices) in batches.iter().enumerate() {
            let batch = loader.load(indices, epoch, &self.device)?;
            let (restored, target, loss) = l1_loss(&self.models, &batch)?;
            total_l1 += loss.to_scalar::<f32>()? as f64;

            if !cross_valid {
                let mut grads = loss.backward()?;
                self.collective.all_reduce_gradients(&mut grads, &gen_vars)?;
                self.optimizer.step(&grads)?;

                if let (Some(critic), Some(disc_opt)) =
                    (self.models.discriminator(), self.disc_optimizer.as_mut())
                {
                    let disc_loss = critic.discriminator_loss(&target, &restored.detach())?;
                    total_disc += disc_loss.to_scalar::<f32>()? as f64;
                    let mut grads = disc_loss.backward()?;
                    self.collective.all_reduce_gradients(&mut grads, &disc_vars)?;
                    disc_opt.step(&grads)?;
                }
            }

            progress.update(i, total_l1 / (i + 1) as f64);
        }

        let n = batches.len() as f64;
        let mut metrics = EpochMetrics::new();
        metrics.insert(format!("{}{}", prefix, TOTAL_LOSS), total_l1 / n);
        metrics.insert(format!("{}{}", prefix, EVALUATION_LOSS), total_l1 / n);
        metrics.insert(format!("{}{}", prefix, GENERATOR_L1_LOSS), total_l1 / n);
        if !cross_valid && self.disc_optimizer.is_some() {
            metrics.insert(DISCRIMINATOR_LOSS.to_string(), total_disc / n);
        }
        Ok(metrics)
    }

    /// Enhance and score the test set with the selected generator state
    fn evaluate_test(&self) -> MlResult<Option<EvaluationScores>> {
        let Some(test) = self.data.test.as_ref().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let best = if self.config.solver.evaluate_on_best {
            self.best_states.as_ref().and_then(|b| b.get(GENERATOR))
        } else {
            None
        };
        let current = match best {
            Some(state) => {
                log::info!("Evaluating with the best state");
                let current = self.models.generator_state()?;
                self.models.load_generator_state(state, Path::new("best state"))?;
                Some(current)
            }
            None => None,
        };

        let result = evaluate(&self.models, test, &self.enhancer, &self.config.solver.samples_dir);

        if let Some(current) = current {
            self.models.load_generator_state(&current, Path::new("current state"))?;
        }
        result.map(Some)
    }

    fn save_checkpoint(&self) -> MlResult<()> {
        let mut optimizers = BTreeMap::new();
        optimizers.insert(OPTIMIZER.to_string(), self.optimizer.export_state()?);
        if let Some(disc) = &self.disc_optimizer {
            optimizers.insert(DISC_OPTIMIZER.to_string(), disc.export_state()?);
        }
        Checkpoint::new(
            self.models.export_states()?,
            self.best_states.clone(),
            optimizers,
            self.history.clone(),
        )
        .save(&self.config.solver.checkpoint_file)
    }

    /// Resume, then run the remaining epochs
    pub fn train(&mut self) -> MlResult<&[EpochMetrics]> {
        self.resume()?;

        let epochs = self.config.solver.epochs;
        let solver = self.config.solver.clone();
        let has_valid = self.data.valid.as_ref().is_some_and(|v| !v.is_empty());

        for epoch in self.history.len()..epochs {
            let is_last = epoch + 1 == epochs;

            self.enter(SolverState::Training);
            let mut metrics = self.run_epoch(epoch, false)?;
            log::info!("Train Summary | End of Epoch {} | {}", epoch + 1, format_metrics(&metrics));

            let mut evaluation_loss = metrics[TOTAL_LOSS];
            if solver.cross_valid && has_valid && ((epoch + 1) % solver.cross_valid_every == 0 || is_last) {
                self.enter(SolverState::CrossValidating);
                let valid = self.run_epoch(epoch, true)?;
                log::info!("Valid Summary | End of Epoch {} | {}", epoch + 1, format_metrics(&valid));

                evaluation_loss = valid[VALID_EVALUATION_LOSS];
                let previous_best = self
                    .history
                    .iter()
                    .filter_map(|m| m.get(VALID_EVALUATION_LOSS).copied())
                    .fold(f64::INFINITY, f64::min);
                let best_loss = previous_best.min(evaluation_loss);
                if evaluation_loss < previous_best {
                    log::info!("New best valid loss {:.4}", evaluation_loss);
                    self.best_states = Some(self.models.export_states()?);
                }
                metrics.extend(valid);
                metrics.insert(BEST_LOSS.to_string(), best_loss);
            }
            metrics.insert(EVALUATION_LOSS.to_string(), evaluation_loss);

            if (epoch + 1) % solver.eval_every == 0 || is_last {
                self.enter(SolverState::Evaluating);
                if let Some(scores) = self.evaluate_test()? {
                    log::info!(
                        "Evaluation | Epoch {} | lsd {:.4} | quality {:.4} ({} samples)",
                        epoch + 1,
                        scores.lsd,
                        scores.quality,
                        scores.count
                    );
                    metrics.insert(LSD.to_string(), scores.lsd);
                    metrics.insert(QUALITY.to_string(), scores.quality);
                }
            }

            self.enter(SolverState::Checkpointing);
            self.collective.average_metrics(&mut metrics)?;
            check_finite(epoch, &metrics)?;
            self.history.push(metrics);

            if self.collective.is_primary() {
                write_history(&solver.history_file, &self.history)?;
                if solver.checkpoint {
                    self.save_checkpoint()?;
                }
            }
            self.collective.barrier()?;

            log::info!(
                "Overall Summary | Epoch {} | {}",
                epoch + 1,
                format_metrics(&self.history[epoch])
            );
        }

        self.enter(SolverState::Done);
        Ok(&self.history)
    }
}

impl std::fmt::Debug for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("state", &self.state)
            .field("epochs_done", &self.history.len())
            .field("has_best", &self.best_states.is_some())
            .finish()
    }
}
