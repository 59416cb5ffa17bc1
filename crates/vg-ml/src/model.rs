//! Restoration model interface and reference models
//!
//! The training loop only sees `RestorationModel` / `AdversarialCritic`
//! and the `VarMap` holding their parameters. Tensors are
//! `[batch, 1, bins, frames]` magnitude spectrograms.

use std::collections::BTreeMap;
use std::path::Path;

use candle_core::{DType, Device, Module, Result as CandleResult, Tensor, Var};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder, VarMap};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::checkpoint::{ModelState, ModelStates, TensorState};
use crate::config::ModelConfig;
use crate::error::{MlError, MlResult};

/// Model name of the restoration network
pub const GENERATOR: &str = "generator";
/// Model name of the adversarial critic
pub const DISCRIMINATOR: &str = "discriminator";

// ═══════════════════════════════════════════════════════════════════════════════
// INTERFACES
// ═══════════════════════════════════════════════════════════════════════════════

/// Masked magnitude -> restored magnitude
///
/// The output may drop bins (e.g. Nyquist); the loss crops the target to
/// the output bin count.
pub trait RestorationModel: Send + Sync {
    fn forward(&self, masked: &Tensor) -> CandleResult<Tensor>;
}

/// Critic used in adversarial training
pub trait AdversarialCritic: Send + Sync {
    /// Per-patch realness scores
    fn score(&self, spectrogram: &Tensor) -> CandleResult<Tensor>;

    /// Least-squares GAN loss: `mean((D(real) - 1)^2) + mean(D(fake)^2)`
    fn discriminator_loss(&self, real: &Tensor, fake: &Tensor) -> CandleResult<Tensor> {
        let real_term = self.score(real)?.affine(1.0, -1.0)?.sqr()?.mean_all()?;
        let fake_term = self.score(fake)?.sqr()?.mean_all()?;
        real_term + fake_term
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REFERENCE MODELS
// ═══════════════════════════════════════════════════════════════════════════════

fn same_padding(kernel_size: usize) -> Conv2dConfig {
    Conv2dConfig {
        padding: kernel_size / 2,
        ..Default::default()
    }
}

/// Residual convolution stack; drops the Nyquist bin
#[derive(Debug)]
pub struct SpectralRestorer {
    hidden: Vec<Conv2d>,
    output: Conv2d,
}

impl SpectralRestorer {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> CandleResult<Self> {
        let k = config.kernel_size;
        let c = config.hidden_channels;
        let mut hidden = Vec::with_capacity(config.depth);
        for i in 0..config.depth {
            let in_channels = if i == 0 { 1 } else { c };
            hidden.push(conv2d(in_channels, c, k, same_padding(k), vb.pp(format!("conv{}", i)))?);
        }
        let output = conv2d(c, 1, k, same_padding(k), vb.pp("output"))?;
        Ok(Self { hidden, output })
    }
}

impl RestorationModel for SpectralRestorer {
    fn forward(&self, masked: &Tensor) -> CandleResult<Tensor> {
        let mut h = masked.clone();
        for conv in &self.hidden {
            h = conv.forward(&h)?.relu()?;
        }
        let restored = (masked + self.output.forward(&h)?)?.relu()?;
        let (_, _, bins, _) = restored.dims4()?;
        restored.narrow(2, 0, bins.saturating_sub(1).max(1))
    }
}

/// Fully convolutional patch critic
#[derive(Debug)]
pub struct SpectralDiscriminator {
    layers: Vec<Conv2d>,
    output: Conv2d,
}

impl SpectralDiscriminator {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> CandleResult<Self> {
        let k = config.kernel_size;
        let c = config.discriminator_channels;
        let layers = vec![
            conv2d(1, c, k, same_padding(k), vb.pp("conv0"))?,
            conv2d(c, c, k, same_padding(k), vb.pp("conv1"))?,
        ];
        let output = conv2d(c, 1, k, same_padding(k), vb.pp("output"))?;
        Ok(Self { layers, output })
    }
}

impl AdversarialCritic for SpectralDiscriminator {
    fn score(&self, spectrogram: &Tensor) -> CandleResult<Tensor> {
        let mut h = spectrogram.clone();
        for conv in &self.layers {
            h = conv.forward(&h)?.relu()?;
        }
        self.output.forward(&h)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODEL SET
// ═══════════════════════════════════════════════════════════════════════════════

/// A model together with the variables it owns
pub struct Trainable<M: ?Sized> {
    pub vars: VarMap,
    pub model: Box<M>,
}

/// Generator and optional discriminator, addressed by model name
pub struct ModelSet {
    generator: Trainable<dyn RestorationModel>,
    discriminator: Option<Trainable<dyn AdversarialCritic>>,
    device: Device,
}

impl std::fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSet")
            .field("adversarial", &self.discriminator.is_some())
            .field("device", &self.device)
            .finish()
    }
}

impl ModelSet {
    /// Build the reference models with seeded initialisation
    pub fn build(config: &ModelConfig, seed: u64, device: &Device) -> MlResult<Self> {
        let gen_vars = VarMap::new();
        let generator = SpectralRestorer::new(
            config,
            VarBuilder::from_varmap(&gen_vars, DType::F32, device),
        )?;
        init_varmap(&gen_vars, seed)?;

        let discriminator = if config.adversarial {
            let disc_vars = VarMap::new();
            let disc = SpectralDiscriminator::new(
                config,
                VarBuilder::from_varmap(&disc_vars, DType::F32, device),
            )?;
            init_varmap(&disc_vars, seed.wrapping_add(1))?;
            Some(Trainable {
                vars: disc_vars,
                model: Box::new(disc) as Box<dyn AdversarialCritic>,
            })
        } else {
            None
        };

        Ok(Self {
            generator: Trainable {
                vars: gen_vars,
                model: Box::new(generator),
            },
            discriminator,
            device: device.clone(),
        })
    }

    /// Wrap externally defined models
    pub fn from_parts(
        generator: Trainable<dyn RestorationModel>,
        discriminator: Option<Trainable<dyn AdversarialCritic>>,
        device: &Device,
    ) -> Self {
        Self {
            generator,
            discriminator,
            device: device.clone(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn generator(&self) -> &dyn RestorationModel {
        self.generator.model.as_ref()
    }

    pub fn generator_vars(&self) -> &VarMap {
        &self.generator.vars
    }

    pub fn discriminator(&self) -> Option<&dyn AdversarialCritic> {
        self.discriminator.as_ref().map(|d| d.model.as_ref())
    }

    pub fn discriminator_vars(&self) -> Option<&VarMap> {
        self.discriminator.as_ref().map(|d| &d.vars)
    }

    fn named_vars(&self) -> Vec<(&'static str, &VarMap)> {
        let mut named = vec![(GENERATOR, &self.generator.vars)];
        if let Some(disc) = &self.discriminator {
            named.push((DISCRIMINATOR, &disc.vars));
        }
        named
    }

    /// Snapshot every model's parameters
    pub fn export_states(&self) -> MlResult<ModelStates> {
        let mut states = BTreeMap::new();
        for (name, vars) in self.named_vars() {
            states.insert(name.to_string(), export_varmap(vars)?);
        }
        Ok(states)
    }

    /// Overwrite every model's parameters from a snapshot
    pub fn load_states(&self, states: &ModelStates, source: &Path) -> MlResult<()> {
        for (name, vars) in self.named_vars() {
            let state = states.get(name).ok_or_else(|| MlError::Checkpoint {
                path: source.to_path_buf(),
                reason: format!("no state for model '{}'", name),
            })?;
            load_varmap(vars, state, source)?;
        }
        Ok(())
    }

    /// Snapshot of the generator alone
    pub fn generator_state(&self) -> MlResult<ModelState> {
        export_varmap(&self.generator.vars)
    }

    /// Overwrite the generator alone
    pub fn load_generator_state(&self, state: &ModelState, source: &Path) -> MlResult<()> {
        load_varmap(&self.generator.vars, state, source)
    }

    /// Trainable scalar count per model name
    pub fn parameter_counts(&self) -> MlResult<Vec<(String, usize)>> {
        self.named_vars()
            .into_iter()
            .map(|(name, vars)| {
                let data = lock_vars(vars)?;
                let count = data.values().map(|v| v.elem_count()).sum();
                Ok((name.to_string(), count))
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARAMETER HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn lock_vars(
    vars: &VarMap,
) -> MlResult<std::sync::MutexGuard<'_, std::collections::HashMap<String, Var>>> {
    vars.data()
        .lock()
        .map_err(|_| MlError::Internal("parameter map lock poisoned".into()))
}

/// Variables sorted by parameter name
fn sorted_vars(vars: &VarMap) -> MlResult<Vec<(String, Var)>> {
    let data = lock_vars(vars)?;
    let mut named: Vec<(String, Var)> = data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(named)
}

/// Uniform `±1/sqrt(fan_in)` weights, zero biases, drawn in name order
fn init_varmap(vars: &VarMap, seed: u64) -> MlResult<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for (name, var) in sorted_vars(vars)? {
        let dims = var.dims().to_vec();
        let count = var.elem_count();
        let data: Vec<f32> = if name.ends_with("bias") {
            vec![0.0; count]
        } else {
            let fan_in: usize = dims.iter().skip(1).product::<usize>().max(1);
            let bound = 1.0 / (fan_in as f32).sqrt();
            (0..count).map(|_| rng.random_range(-bound..bound)).collect()
        };
        var.set(&Tensor::from_vec(data, dims.as_slice(), var.device())?)?;
    }
    Ok(())
}

fn export_varmap(vars: &VarMap) -> MlResult<ModelState> {
    sorted_vars(vars)?
        .into_iter()
        .map(|(name, var)| Ok((name, TensorState::from_tensor(var.as_tensor())?)))
        .collect()
}

fn load_varmap(vars: &VarMap, state: &ModelState, source: &Path) -> MlResult<()> {
    for (name, var) in sorted_vars(vars)? {
        let fail = |reason: String| MlError::Checkpoint {
            path: source.to_path_buf(),
            reason,
        };
        let saved = state
            .get(&name)
            .ok_or_else(|| fail(format!("missing parameter '{}'", name)))?;
        if saved.shape.as_slice() != var.dims() {
            return Err(fail(format!(
                "parameter '{}' has shape {:?}, expected {:?}",
                name,
                saved.shape,
                var.dims()
            )));
        }
        var.set(&saved.to_tensor(var.device())?)?;
    }
    Ok(())
}
