//! Data-parallel collective contract
//!
//! Every worker holds a full replica; gradients are reduced once per batch
//! before the optimizer step. Only the primary rank persists files.

use candle_core::backprop::GradStore;
use candle_core::Var;

use crate::checkpoint::EpochMetrics;
use crate::error::MlResult;

/// Collective operations across data-parallel workers
pub trait Collective: Send + Sync {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Rank responsible for history and checkpoint writes
    fn is_primary(&self) -> bool {
        self.rank() == 0
    }

    /// Average the gradients of `vars` across workers, in place
    fn all_reduce_gradients(&self, grads: &mut GradStore, vars: &[Var]) -> MlResult<()>;

    /// Average epoch metrics across workers, in place
    fn average_metrics(&self, metrics: &mut EpochMetrics) -> MlResult<()>;

    fn barrier(&self) -> MlResult<()>;
}

/// Single worker: every collective is the identity
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_gradients(&self, _grads: &mut GradStore, _vars: &[Var]) -> MlResult<()> {
        Ok(())
    }

    fn average_metrics(&self, _metrics: &mut EpochMetrics) -> MlResult<()> {
        Ok(())
    }

    fn barrier(&self) -> MlResult<()> {
        Ok(())
    }
}
