//! Copy surviving weights from the dense checkpoint into the pruned network.
//!
//! Tensors are resolved by name in both checkpoints. For a conv block the
//! kernel's output axis is sliced by the block's own mask and its input
//! axis by the retained indices of its provenance; normalization vectors
//! follow the own mask. Head convolutions keep every output and bias.

use super::mask::MaskDictionary;
use crate::checkpoint::Checkpoint;
use crate::error::{PruneError, Result};
use crate::network::{ConvBn, HeadConv, Network, ProvenanceMap, Unit};
use crate::tensor::{ElementKind, Tensor};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Zero-initialized checkpoint of `rebuilt` plus the set of names written.
struct Target {
    checkpoint: Checkpoint,
    written: BTreeSet<String>,
}

impl Target {
    fn write(&mut self, name: String, tensor: Tensor) -> Result<()> {
        self.checkpoint.overwrite(&name, tensor)?;
        self.written.insert(name);
        Ok(())
    }
}

/// Populate a checkpoint for `rebuilt` from `original`.
///
/// # Errors
///
/// Returns [`PruneError::MissingMask`] or [`PruneError::MissingProvenance`]
/// for an inconsistent graph, [`PruneError::ShapeMismatch`] if a sliced
/// tensor disagrees with its declaration, and [`PruneError::Incomplete`] if
/// the written names differ from the declared or original names.
pub fn transplant(
    original: &Checkpoint,
    rebuilt: &Network,
    masks: &MaskDictionary,
    provenance: &ProvenanceMap,
) -> Result<Checkpoint> {
    let mut target = Target {
        checkpoint: Checkpoint::zeros_for(rebuilt),
        written: BTreeSet::new(),
    };

    for layer in rebuilt.layers() {
        for unit in &layer.units {
            match unit {
                Unit::ConvBn(block) => conv_block(original, block, masks, provenance, &mut target)?,
                Unit::HeadConv(head) => head_conv(original, head, masks, provenance, &mut target)?,
                Unit::Buffer { name, .. } => {
                    target.write(name.clone(), original.require(name)?.clone())?;
                }
            }
        }
    }

    let mut missing: Vec<String> = rebuilt
        .declared_tensors()
        .into_keys()
        .filter(|name| !target.written.contains(name))
        .collect();
    missing.extend(
        original
            .names()
            .filter(|name| !target.written.contains(*name))
            .map(str::to_string),
    );
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(PruneError::Incomplete { missing });
    }

    info!(
        tensors = target.written.len(),
        values = target.checkpoint.num_values(),
        "weights transplanted"
    );
    Ok(target.checkpoint)
}

fn conv_block(
    original: &Checkpoint,
    block: &ConvBn,
    masks: &MaskDictionary,
    provenance: &ProvenanceMap,
    target: &mut Target,
) -> Result<()> {
    let norm = block.norm_id();
    let own = masks
        .get(&norm)
        .ok_or_else(|| PruneError::MissingMask { layer: norm.clone() })?;
    let out_idx = own.retained_indices();

    let mut weight = original
        .require(&block.weight_name())?
        .index_select(0, &out_idx)?;
    if let Some(p) = provenance.get(&norm) {
        weight = weight.index_select(1, &p.input_indices(masks)?)?;
    }
    debug!(
        layer = block.id.as_str(),
        shape = ?weight.shape(),
        "conv block"
    );
    target.write(block.weight_name(), weight)?;

    for name in block.norm_vector_names() {
        let sliced = original.require(&name)?.index_select(0, &out_idx)?;
        target.write(name, sliced)?;
    }
    let counter = block.norm_counter_name();
    let mut steps = original.require(&counter)?.clone();
    // Step counters are int64 in torch state dicts.
    if !steps.kind().is_integral() {
        steps = steps.with_kind(ElementKind::Int64);
    }
    target.write(counter, steps)
}

fn head_conv(
    original: &Checkpoint,
    head: &HeadConv,
    masks: &MaskDictionary,
    provenance: &ProvenanceMap,
    target: &mut Target,
) -> Result<()> {
    let p = provenance
        .get(&head.id)
        .ok_or_else(|| PruneError::MissingProvenance {
            layer: head.id.clone(),
        })?;
    let weight = original
        .require(&head.weight_name())?
        .index_select(1, &p.input_indices(masks)?)?;
    target.write(head.weight_name(), weight)?;
    target.write(head.bias_name(), original.require(&head.bias_name())?.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{build, DenseWidths};
    use crate::pruning::ChannelMask;
    use crate::topology::TopologyDescriptor;

    const TINY: &str = r#"{"nc": 1, "anchors": 1, "width_multiple": 1.0,
        "backbone": [[-1, 1, "Conv", [8, 3, 2]], [-1, 1, "Conv", [8, 1, 1]]],
        "head": [[[0, 1], 1, "Concat", [1]], [[2], 1, "Detect", ["nc", "anchors"]]]}"#;

    /// Checkpoint whose values encode their own flat position.
    fn counting_checkpoint(net: &Network) -> Checkpoint {
        net.declared_tensors()
            .into_iter()
            .map(|(name, shape)| {
                let len: usize = shape.iter().product();
                let data = (0..len).map(|i| i as f32 + 1.0).collect();
                (name, Tensor::from_vec(data, &shape).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_concat_head_slicing() {
        let desc = TopologyDescriptor::from_json(TINY).unwrap();
        let (dense, _) = build(&desc, &DenseWidths).unwrap();
        let original = counting_checkpoint(&dense);

        let mut masks = MaskDictionary::new();
        masks.insert("model.0.bn", ChannelMask::from_indices(8, &[1, 6]));
        masks.insert("model.1.bn", ChannelMask::from_indices(8, &[0, 3, 7]));
        let (rebuilt, provenance) = build(&desc, &masks).unwrap();
        let pruned = transplant(&original, &rebuilt, &masks, &provenance).unwrap();

        // Head input = concat(model.0, model.1) = [1, 6, 8, 11, 15].
        let head = pruned.get("model.3.m.0.weight").unwrap();
        assert_eq!(head.shape(), &[6, 5, 1, 1]);
        assert_eq!(&head.data()[..5], &[2.0, 7.0, 9.0, 12.0, 16.0]);
        assert_eq!(
            pruned.get("model.3.m.0.bias"),
            original.get("model.3.m.0.bias")
        );

        // model.1 reads model.0: rows [0, 3, 7], columns [1, 6].
        let w1 = pruned.get("model.1.conv.weight").unwrap();
        assert_eq!(w1.shape(), &[3, 2, 1, 1]);
        assert_eq!(w1.data(), &[2.0, 7.0, 26.0, 31.0, 58.0, 63.0]);

        assert_eq!(pruned.get("model.0.bn.weight").unwrap().data(), &[2.0, 7.0]);
        let steps = pruned.get("model.0.bn.num_batches_tracked").unwrap();
        assert_eq!(
            steps.data(),
            original.get("model.0.bn.num_batches_tracked").unwrap().data()
        );
        assert_eq!(steps.kind(), ElementKind::Int64);
    }

    #[test]
    fn test_missing_original_tensor() {
        let desc = TopologyDescriptor::from_json(TINY).unwrap();
        let (dense, provenance) = build(&desc, &DenseWidths).unwrap();
        let masks: MaskDictionary = dense
            .conv_blocks()
            .map(|b| (b.norm_id(), ChannelMask::all(b.c_out)))
            .collect();
        let mut original = counting_checkpoint(&dense);
        original = original
            .iter()
            .filter(|(name, _)| name.as_str() != "model.3.anchors")
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect();
        let err = transplant(&original, &dense, &masks, &provenance).unwrap_err();
        assert!(matches!(err, PruneError::MissingTensor { tensor } if tensor == "model.3.anchors"));
    }

    #[test]
    fn test_extra_original_tensor_is_incomplete() {
        let desc = TopologyDescriptor::from_json(TINY).unwrap();
        let (dense, provenance) = build(&desc, &DenseWidths).unwrap();
        let masks: MaskDictionary = dense
            .conv_blocks()
            .map(|b| (b.norm_id(), ChannelMask::all(b.c_out)))
            .collect();
        let mut original = counting_checkpoint(&dense);
        original.insert("model.3.stride".to_string(), Tensor::from_slice(&[8.0]));
        let err = transplant(&original, &dense, &masks, &provenance).unwrap_err();
        assert!(matches!(err, PruneError::Incomplete { missing } if missing == ["model.3.stride"]));
    }
}
