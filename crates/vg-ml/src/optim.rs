//! Adam optimizer with exportable state
//!
//! Implements `candle_nn::Optimizer` so it plugs into the usual
//! `backward_step` flow, and keeps its moments in plain `Var`s so the full
//! state can be checkpointed and restored bit-for-bit.

use candle_core::backprop::GradStore;
use candle_core::{Result as CandleResult, Var};
use candle_nn::{Optimizer, VarMap};
use serde::{Deserialize, Serialize};

use crate::checkpoint::TensorState;
use crate::config::OptimConfig;
use crate::error::{MlError, MlResult};

/// Serialized optimizer state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamState {
    pub step: usize,
    pub learning_rate: f64,
    pub first_moments: Vec<TensorState>,
    pub second_moments: Vec<TensorState>,
}

struct Slot {
    var: Var,
    m: Var,
    v: Var,
}

/// Adam with optional L2 weight decay
pub struct Adam {
    slots: Vec<Slot>,
    config: OptimConfig,
    step: usize,
}

impl std::fmt::Debug for Adam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adam")
            .field("params", &self.slots.len())
            .field("step", &self.step)
            .field("lr", &self.config.lr)
            .finish()
    }
}

impl Optimizer for Adam {
    type Config = OptimConfig;

    fn new(vars: Vec<Var>, config: OptimConfig) -> CandleResult<Self> {
        let slots = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let m = Var::zeros(var.dims(), var.dtype(), var.device())?;
                let v = Var::zeros(var.dims(), var.dtype(), var.device())?;
                Ok(Slot { var, m, v })
            })
            .collect::<CandleResult<Vec<_>>>()?;
        Ok(Self {
            slots,
            config,
            step: 0,
        })
    }

    fn step(&mut self, grads: &GradStore) -> CandleResult<()> {
        self.step += 1;
        let OptimConfig {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.config;
        let scale_m = 1.0 / (1.0 - beta1.powi(self.step as i32));
        let scale_v = 1.0 / (1.0 - beta2.powi(self.step as i32));

        for slot in &self.slots {
            let theta = slot.var.as_tensor();
            let Some(grad) = grads.get(theta) else {
                continue;
            };
            let grad = if weight_decay > 0.0 {
                (grad + theta.affine(weight_decay, 0.0)?)?
            } else {
                grad.clone()
            };

            let m = (slot.m.affine(beta1, 0.0)? + grad.affine(1.0 - beta1, 0.0)?)?;
            let v = (slot.v.affine(beta2, 0.0)? + grad.sqr()?.affine(1.0 - beta2, 0.0)?)?;

            let m_hat = m.affine(scale_m, 0.0)?;
            let v_hat = v.affine(scale_v, 0.0)?;
            let update = (m_hat / v_hat.sqrt()?.affine(1.0, eps)?)?.affine(lr, 0.0)?;

            slot.var.set(&theta.sub(&update)?)?;
            slot.m.set(&m)?;
            slot.v.set(&v)?;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}

impl Adam {
    /// Optimizer over every variable of a map, in parameter-name order
    pub fn from_varmap(varmap: &VarMap, config: OptimConfig) -> MlResult<Self> {
        let vars = {
            let data = varmap
                .data()
                .lock()
                .map_err(|_| MlError::Internal("parameter map lock poisoned".into()))?;
            let mut named: Vec<(&String, &Var)> = data.iter().collect();
            named.sort_by(|a, b| a.0.cmp(b.0));
            named.into_iter().map(|(_, var)| var.clone()).collect::<Vec<_>>()
        };
        Ok(<Self as Optimizer>::new(vars, config)?)
    }

    /// Number of completed steps
    pub fn steps(&self) -> usize {
        self.step
    }

    pub fn export_state(&self) -> MlResult<AdamState> {
        let mut first_moments = Vec::with_capacity(self.slots.len());
        let mut second_moments = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            first_moments.push(TensorState::from_tensor(slot.m.as_tensor())?);
            second_moments.push(TensorState::from_tensor(slot.v.as_tensor())?);
        }
        Ok(AdamState {
            step: self.step,
            learning_rate: self.config.lr,
            first_moments,
            second_moments,
        })
    }

    /// Restore moments, step count and learning rate
    pub fn import_state(&mut self, state: &AdamState) -> MlResult<()> {
        let n = self.slots.len();
        if state.first_moments.len() != n || state.second_moments.len() != n {
            return Err(MlError::Shape {
                expected: format!("{} optimizer moments", n),
                got: format!(
                    "{} first / {} second",
                    state.first_moments.len(),
                    state.second_moments.len()
                ),
            });
        }

        for (slot, (m, v)) in self
            .slots
            .iter()
            .zip(state.first_moments.iter().zip(&state.second_moments))
        {
            let device = slot.var.device();
            for (target, saved) in [(&slot.m, m), (&slot.v, v)] {
                if target.dims() != saved.shape.as_slice() {
                    return Err(MlError::Shape {
                        expected: format!("{:?}", target.dims()),
                        got: format!("{:?}", saved.shape),
                    });
                }
                target.set(&saved.to_tensor(device)?.to_dtype(target.dtype())?)?;
            }
        }

        self.step = state.step;
        self.config.lr = state.learning_rate;
        Ok(())
    }
}
