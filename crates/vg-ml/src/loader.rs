//! Batch loading
//!
//! Epoch order is shuffled with a `(seed, epoch)` RNG, padded to a multiple
//! of the world size and sharded `rank, rank + world, ...`. Items of a batch
//! are built on a fixed rayon pool and stacked in index order.

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::dataset::{MagnitudePair, MaskedMagnitudeDataset};
use crate::distrib::Collective;
use crate::error::{MlError, MlResult};

/// `[batch, 1, bins, frames]` input/target tensors
#[derive(Debug)]
pub struct Batch {
    pub masked: Tensor,
    pub clean: Tensor,
    /// Dataset indices, in batch order
    pub indices: Vec<usize>,
}

/// Indices this rank visits in `epoch`
pub fn shard_indices(
    len: usize,
    epoch: usize,
    seed: u64,
    shuffle: bool,
    rank: usize,
    world_size: usize,
) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);
    }

    let world_size = world_size.max(1);
    let total = len.div_ceil(world_size) * world_size;
    let padding: Vec<usize> = order.iter().cycle().take(total - len).copied().collect();
    order.extend(padding);

    order.into_iter().skip(rank).step_by(world_size).collect()
}

fn stack(items: &[&ndarray::Array2<f32>], device: &Device) -> MlResult<Tensor> {
    let (bins, frames) = items
        .first()
        .map(|a| a.dim())
        .ok_or_else(|| MlError::Internal("empty batch".into()))?;

    let mut data = Vec::with_capacity(items.len() * bins * frames);
    for item in items {
        if item.dim() != (bins, frames) {
            return Err(MlError::Shape {
                expected: format!("[{}, {}]", bins, frames),
                got: format!("{:?}", item.dim()),
            });
        }
        data.extend(item.iter().copied());
    }
    Ok(Tensor::from_vec(data, (items.len(), 1, bins, frames), device)?)
}

/// Sharded, shuffled batches over a masked-magnitude dataset
pub struct BatchLoader<'a> {
    dataset: &'a MaskedMagnitudeDataset,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    rank: usize,
    world_size: usize,
    pool: rayon::ThreadPool,
}

impl<'a> BatchLoader<'a> {
    pub fn new(
        dataset: &'a MaskedMagnitudeDataset,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
        num_workers: usize,
        collective: &dyn Collective,
    ) -> MlResult<Self> {
        if batch_size == 0 {
            return Err(MlError::Config("batch_size must be > 0".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .build()
            .map_err(|e| MlError::Internal(e.to_string()))?;
        Ok(Self {
            dataset,
            batch_size,
            shuffle,
            seed,
            rank: collective.rank(),
            world_size: collective.world_size(),
            pool,
        })
    }

    /// Per-epoch batch index lists for this rank
    pub fn epoch_batches(&self, epoch: usize) -> Vec<Vec<usize>> {
        shard_indices(
            self.dataset.len(),
            epoch,
            self.seed,
            self.shuffle,
            self.rank,
            self.world_size,
        )
        .chunks(self.batch_size)
        .map(<[usize]>::to_vec)
        .collect()
    }

    /// Build and stack the items of one batch
    pub fn load(&self, indices: &[usize], epoch: usize, device: &Device) -> MlResult<Batch> {
        let dataset = self.dataset;
        let items: Vec<MagnitudePair> = self.pool.install(|| {
            indices
                .par_iter()
                .map(|&index| dataset.get(index, epoch))
                .collect::<MlResult<Vec<_>>>()
        })?;

        let masked: Vec<_> = items.iter().map(|p| &p.masked).collect();
        let clean: Vec<_> = items.iter().map(|p| &p.clean).collect();
        Ok(Batch {
            masked: stack(&masked, device)?,
            clean: stack(&clean, device)?,
            indices: indices.to_vec(),
        })
    }
}
