//! Property-based tests for aprender-prune.
//!
//! Uses proptest to verify pruning invariants across many random inputs.

mod common;

use aprender_prune::network::concat_input_indices;
use aprender_prune::pipeline::{PruneOptions, Pruner};
use aprender_prune::pruning::{ChannelMask, ChannelScorer};
use aprender_prune::{Checkpoint, Tensor};
use common::{dense, mini_descriptor, synthetic_checkpoint};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// Strategies
// ============================================================================

/// Random masks of width 1-64.
fn random_mask() -> impl Strategy<Value = ChannelMask> {
    (1usize..64)
        .prop_flat_map(|n| prop::collection::vec(any::<bool>(), n))
        .prop_map(ChannelMask::new)
}

/// Random per-layer scale vectors for 1-6 layers.
fn random_layers() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-2.0f32..2.0, 1..32), 1..6)
}

fn scale_checkpoint(layers: &[Vec<f32>]) -> (Checkpoint, Vec<String>) {
    let mut ckpt = Checkpoint::new();
    let mut names = Vec::new();
    for (i, gamma) in layers.iter().enumerate() {
        let norm = format!("model.{i}.bn");
        ckpt.insert(format!("{norm}.weight"), Tensor::from_slice(gamma));
        ckpt.insert(format!("{norm}.bias"), Tensor::from_slice(gamma));
        names.push(norm);
    }
    (ckpt, names)
}

// ============================================================================
// Concatenation Offsets
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_concat_indices_map_back_to_sources(
        masks in prop::collection::vec(random_mask(), 1..5)
    ) {
        let parts: Vec<&ChannelMask> = masks.iter().collect();
        let indices = concat_input_indices(&parts);

        prop_assert_eq!(indices.len(), masks.iter().map(ChannelMask::count).sum::<usize>());
        prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));

        for idx in indices {
            let mut offset = 0;
            let mut found = false;
            for mask in &masks {
                if idx < offset + mask.len() {
                    prop_assert!(mask.is_kept(idx - offset));
                    found = true;
                    break;
                }
                offset += mask.len();
            }
            prop_assert!(found, "index {} past the joint axis", idx);
        }
    }
}

// ============================================================================
// Mask Generation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_masks_respect_floor_and_threshold(
        layers in random_layers(),
        ratio in 0.0f64..0.95
    ) {
        let (ckpt, names) = scale_checkpoint(&layers);
        let scorer = ChannelScorer::new(ratio).unwrap();
        let (masks, report) = scorer.generate_masks(&ckpt, &names, &BTreeSet::new()).unwrap();

        for (norm, gamma) in names.iter().zip(&layers) {
            let mask = masks.get(norm).unwrap();
            prop_assert_eq!(mask.len(), gamma.len());
            prop_assert!(mask.count() >= 2.min(gamma.len()));
            for (c, g) in gamma.iter().enumerate() {
                if g.abs() >= report.threshold {
                    prop_assert!(mask.is_kept(c));
                }
            }
        }
    }

    #[test]
    fn prop_mask_generation_is_deterministic(
        layers in random_layers(),
        ratio in 0.0f64..0.95
    ) {
        let (ckpt, names) = scale_checkpoint(&layers);
        let scorer = ChannelScorer::new(ratio).unwrap();
        let first = scorer.generate_masks(&ckpt, &names, &BTreeSet::new()).unwrap();
        let second = scorer.generate_masks(&ckpt, &names, &BTreeSet::new()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_zero_ratio_keeps_everything(layers in random_layers()) {
        let (ckpt, names) = scale_checkpoint(&layers);
        let scorer = ChannelScorer::new(0.0).unwrap();
        let (masks, _) = scorer.generate_masks(&ckpt, &names, &BTreeSet::new()).unwrap();
        prop_assert!(masks.iter().all(|(_, m)| m.is_full()));
    }
}

// ============================================================================
// End-to-end Pruning
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_pruned_checkpoint_matches_rebuilt_network(
        seed in any::<u64>(),
        ratio in 0.0f64..0.95
    ) {
        let desc = mini_descriptor();
        let net = dense(&desc);
        let excluded = net.exclusion_set();
        let original = synthetic_checkpoint(&net, seed);

        let outcome = Pruner::new(desc, PruneOptions::new(ratio)).run(original.clone()).unwrap();

        prop_assert!(outcome.network.validate_checkpoint(&outcome.checkpoint).is_ok());
        let names: Vec<&str> = outcome.checkpoint.names().collect();
        let original_names: Vec<&str> = original.names().collect();
        prop_assert_eq!(names, original_names);

        for (layer, mask) in outcome.masks.iter() {
            if excluded.contains(layer) {
                prop_assert!(mask.is_full());
            } else {
                prop_assert!(mask.count() >= 2.min(mask.len()));
            }
        }
        prop_assert!(outcome.checkpoint.num_values() <= original.num_values());
    }
}

// ============================================================================
// Tensor Slicing
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_index_select_keeps_rank_and_order(
        rows in 1usize..8,
        cols in 1usize..8,
        keep in prop::collection::vec(any::<bool>(), 8)
    ) {
        let data: Vec<f32> = (0..rows * cols).map(|v| v as f32).collect();
        let t = Tensor::from_vec(data, &[rows, cols]).unwrap();
        let indices: Vec<usize> = (0..cols).filter(|&c| keep[c]).collect();

        let s = t.index_select(1, &indices).unwrap();
        prop_assert_eq!(s.shape(), &[rows, indices.len()][..]);
        for r in 0..rows {
            for (j, &c) in indices.iter().enumerate() {
                prop_assert_eq!(s.data()[r * indices.len() + j], (r * cols + c) as f32);
            }
        }
    }
}
