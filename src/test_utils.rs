//! Synthetic checkpoints for unit tests.

use crate::checkpoint::Checkpoint;
use crate::network::Network;
use crate::tensor::{ElementKind, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Training steps recorded in every `num_batches_tracked`, past the f16 range.
const STEPS: f32 = 120_000.0;

/// A checkpoint matching `network` with seeded random, non-zero values.
///
/// Batch-norm scales are drawn from `[0.01, 1.0)` so thresholds are
/// meaningful; running variances are positive.
pub(crate) fn synthetic_checkpoint(network: &Network, seed: u64) -> Checkpoint {
    let mut rng = StdRng::seed_from_u64(seed);
    network
        .declared_tensors()
        .into_iter()
        .map(|(name, shape)| {
            let len: usize = shape.iter().product();
            let data: Vec<f32> = if name.ends_with(".num_batches_tracked") {
                vec![STEPS]
            } else if name.ends_with(".bn.weight") || name.ends_with(".running_var") {
                (0..len).map(|_| rng.gen_range(0.01f32..1.0)).collect()
            } else {
                (0..len).map(|_| rng.gen_range(0.05f32..1.0) * sign(&mut rng)).collect()
            };
            let mut tensor = Tensor::from_vec(data, &shape).expect("declared shape");
            if name.ends_with(".num_batches_tracked") {
                tensor = tensor.with_kind(ElementKind::Int64);
            }
            (name, tensor)
        })
        .collect()
}

fn sign(rng: &mut StdRng) -> f32 {
    if rng.gen_bool(0.5) {
        1.0
    } else {
        -1.0
    }
}
