//! Shared fixtures for integration tests.

#![allow(dead_code)]

use aprender_prune::network::{build, DenseWidths, Network};
use aprender_prune::topology::TopologyDescriptor;
use aprender_prune::{Checkpoint, ElementKind, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A small detector exercising every supported kind.
pub const MINI_DETECTOR: &str = r#"{
    "nc": 2, "depth_multiple": 1.0, "width_multiple": 0.25,
    "anchors": [[10, 13, 16, 30, 33, 23], [30, 61, 62, 45, 59, 119]],
    "backbone": [
        [-1, 1, "Conv", [32, 3, 2]],
        [-1, 2, "C3", [32]],
        [-1, 1, "Conv", [64, 3, 2]],
        [-1, 1, "C3", [64]],
        [-1, 1, "SPPF", [64, 5]]
    ],
    "head": [
        [-1, 1, "Conv", [32, 1, 1]],
        [-1, 1, "nn.Upsample", [null, 2, "nearest"]],
        [[-1, 1], 1, "Concat", [1]],
        [-1, 1, "C3", [32, false]],
        [[8, 4], 1, "Detect", ["nc", "anchors"]]
    ]
}"#;

pub fn mini_descriptor() -> TopologyDescriptor {
    TopologyDescriptor::from_json(MINI_DETECTOR).unwrap()
}

pub fn dense(desc: &TopologyDescriptor) -> Network {
    build(desc, &DenseWidths).unwrap().0
}

/// Training steps recorded in every `num_batches_tracked`, past the f16 range.
pub const STEPS: f32 = 120_000.0;

/// Seeded random checkpoint for `network` with no zero values.
///
/// Batch-norm scales and running variances lie in `[0.01, 1.0)`; step
/// counters are int64 as in a torch export.
pub fn synthetic_checkpoint(network: &Network, seed: u64) -> Checkpoint {
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
                (0..len)
                    .map(|_| {
                        let magnitude = rng.gen_range(0.05f32..1.0);
                        if rng.gen_bool(0.5) {
                            magnitude
                        } else {
                            -magnitude
                        }
                    })
                    .collect()
            };
            let tensor = Tensor::from_vec(data, &shape).unwrap();
            if name.ends_with(".num_batches_tracked") {
                (name, tensor.with_kind(ElementKind::Int64))
            } else {
                (name, tensor)
            }
        })
        .collect()
}
