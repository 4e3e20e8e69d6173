//! Concrete network graphs realized from a topology descriptor.
//!
//! A [`Network`] is an ordered list of [`Layer`]s. Each layer owns the
//! parameterised units it contributes to a checkpoint: conv blocks
//! (convolution + batch-norm), head output convolutions and buffers. The
//! graph carries no weights; it only declares tensor names and shapes.
//!
//! Naming follows the PyTorch state-dict layout of YOLOv5 checkpoints:
//!
//! | unit | tensors |
//! |------|---------|
//! | conv block `model.3` | `model.3.conv.weight`, `model.3.bn.{weight,bias,running_mean,running_var,num_batches_tracked}` |
//! | C3 bottleneck | `model.2.m.0.cv1.conv.weight`, `model.2.m.0.cv1.bn.*` |
//! | head conv | `model.24.m.0.weight`, `model.24.m.0.bias` |
//! | buffer | `model.24.anchors` |

mod builder;
mod provenance;

pub use builder::{build, DenseWidths, WidthPolicy};
pub use provenance::{concat_input_indices, Provenance, ProvenanceMap};

use crate::checkpoint::Checkpoint;
use crate::error::{PruneError, Result};
use crate::topology::LayerKind;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Per-channel batch-norm vectors, in state-dict suffix form.
pub const NORM_VECTORS: [&str; 4] = ["weight", "bias", "running_mean", "running_var"];

/// Batch-norm step counter suffix (a scalar).
pub const NORM_COUNTER: &str = "num_batches_tracked";

/// Position of a conv block inside its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvRole {
    /// Stand-alone `Conv` layer.
    Plain,
    /// C3 entry convolution (`cv1`).
    CspEntry,
    /// C3 side convolution (`cv2`).
    CspSide,
    /// C3 exit convolution (`cv3`).
    CspExit,
    /// First convolution of a bottleneck.
    BottleneckReduce,
    /// Second convolution of a bottleneck (the residual branch output).
    BottleneckExpand,
    /// SPPF entry convolution.
    PoolEntry,
    /// SPPF exit convolution.
    PoolExit,
    /// Segmentation prototype branch.
    Proto,
}

/// Convolution + batch-norm + activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvBn {
    /// Module path, e.g. `model.2.m.0.cv1`.
    pub id: String,
    /// Input channels.
    pub c_in: usize,
    /// Output channels.
    pub c_out: usize,
    /// Square kernel size.
    pub kernel: usize,
    /// Role inside the owning layer.
    pub role: ConvRole,
}

impl ConvBn {
    /// Identity of the block's normalization layer.
    #[must_use]
    pub fn norm_id(&self) -> String {
        format!("{}.bn", self.id)
    }

    /// Name of the convolution kernel tensor.
    #[must_use]
    pub fn weight_name(&self) -> String {
        format!("{}.conv.weight", self.id)
    }

    /// Names of the per-channel normalization tensors.
    #[must_use]
    pub fn norm_vector_names(&self) -> Vec<String> {
        NORM_VECTORS
            .iter()
            .map(|suffix| format!("{}.bn.{suffix}", self.id))
            .collect()
    }

    /// Name of the normalization step counter.
    #[must_use]
    pub fn norm_counter_name(&self) -> String {
        format!("{}.bn.{NORM_COUNTER}", self.id)
    }

    fn declare(&self, out: &mut BTreeMap<String, Vec<usize>>) {
        out.insert(
            self.weight_name(),
            vec![self.c_out, self.c_in, self.kernel, self.kernel],
        );
        for name in self.norm_vector_names() {
            out.insert(name, vec![self.c_out]);
        }
        out.insert(self.norm_counter_name(), Vec::new());
    }
}

/// 1x1 output convolution of a detection head (with bias, no norm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadConv {
    /// Module path, e.g. `model.24.m.0`.
    pub id: String,
    /// Input channels.
    pub c_in: usize,
    /// Output channels, `na * (nc + 5 [+ nm])`.
    pub c_out: usize,
}

impl HeadConv {
    /// Name of the kernel tensor.
    #[must_use]
    pub fn weight_name(&self) -> String {
        format!("{}.weight", self.id)
    }

    /// Name of the bias tensor.
    #[must_use]
    pub fn bias_name(&self) -> String {
        format!("{}.bias", self.id)
    }
}

/// A parameterised unit owned by a layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    /// Convolution + batch-norm.
    ConvBn(ConvBn),
    /// Head output convolution.
    HeadConv(HeadConv),
    /// Non-trainable buffer copied as is (anchor grid).
    Buffer {
        /// Tensor name
        name: String,
        /// Tensor shape
        shape: Vec<usize>,
    },
}

/// One realized layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Position in the network.
    pub index: usize,
    /// Resolved source layer indices (empty when reading the image).
    pub sources: Vec<usize>,
    /// Kind and descriptor arguments.
    pub kind: LayerKind,
    /// Repeat count after depth gain (bottleneck count for C3).
    pub repeat: usize,
    /// Realized output channels (0 for heads).
    pub out_channels: usize,
    /// Units in registration order.
    pub units: Vec<Unit>,
    /// Bottlenecks add their input to their output.
    pub residual: bool,
}

impl Layer {
    /// Conv blocks of this layer.
    pub fn conv_blocks(&self) -> impl Iterator<Item = &ConvBn> {
        self.units.iter().filter_map(|u| match u {
            Unit::ConvBn(block) => Some(block),
            _ => None,
        })
    }

    /// Number of scalar parameters and buffers.
    #[must_use]
    pub fn num_params(&self) -> usize {
        let mut declared = BTreeMap::new();
        self.declare(&mut declared);
        declared.values().map(|s| s.iter().product::<usize>()).sum()
    }

    fn declare(&self, out: &mut BTreeMap<String, Vec<usize>>) {
        for unit in &self.units {
            match unit {
                Unit::ConvBn(block) => block.declare(out),
                Unit::HeadConv(head) => {
                    out.insert(head.weight_name(), vec![head.c_out, head.c_in, 1, 1]);
                    out.insert(head.bias_name(), vec![head.c_out]);
                }
                Unit::Buffer { name, shape } => {
                    out.insert(name.clone(), shape.clone());
                }
            }
        }
    }
}

/// An ordered, realized network graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    layers: Vec<Layer>,
}

impl Network {
    pub(crate) fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// Layers in declaration order.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True if the network has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// All conv blocks in declaration order.
    pub fn conv_blocks(&self) -> impl Iterator<Item = &ConvBn> {
        self.layers.iter().flat_map(Layer::conv_blocks)
    }

    /// All head output convolutions.
    pub fn head_convs(&self) -> impl Iterator<Item = &HeadConv> {
        self.layers
            .iter()
            .flat_map(|l| l.units.iter())
            .filter_map(|u| match u {
                Unit::HeadConv(head) => Some(head),
                _ => None,
            })
    }

    /// Normalization identities in declaration order.
    #[must_use]
    pub fn norm_ids(&self) -> Vec<String> {
        self.conv_blocks().map(ConvBn::norm_id).collect()
    }

    /// Every tensor name this network declares with its shape.
    #[must_use]
    pub fn declared_tensors(&self) -> BTreeMap<String, Vec<usize>> {
        let mut out = BTreeMap::new();
        for layer in &self.layers {
            layer.declare(&mut out);
        }
        out
    }

    /// Total scalar parameters and buffers.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.layers.iter().map(Layer::num_params).sum()
    }

    /// Normalization layers that must keep every channel.
    ///
    /// Residual bottlenecks add their input to their output, so the C3 entry
    /// conv and every bottleneck conv of a residual block share one channel
    /// layout; the prototype branch feeds mask coefficients directly.
    #[must_use]
    pub fn exclusion_set(&self) -> BTreeSet<String> {
        let mut excluded = BTreeSet::new();
        for layer in &self.layers {
            for block in layer.conv_blocks() {
                let keep_full = match block.role {
                    ConvRole::CspEntry
                    | ConvRole::BottleneckReduce
                    | ConvRole::BottleneckExpand => layer.residual,
                    ConvRole::Proto => true,
                    _ => false,
                };
                if keep_full {
                    excluded.insert(block.norm_id());
                }
            }
        }
        excluded
    }

    /// Check that `checkpoint` holds exactly the declared tensors.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::MissingTensor`], [`PruneError::ShapeMismatch`]
    /// or [`PruneError::UnexpectedTensors`] for the first discrepancy found.
    pub fn validate_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let declared = self.declared_tensors();
        for (name, shape) in &declared {
            let tensor = checkpoint.require(name)?;
            if tensor.shape() != shape.as_slice() {
                return Err(PruneError::ShapeMismatch {
                    tensor: name.clone(),
                    expected: shape.clone(),
                    got: tensor.shape().to_vec(),
                });
            }
        }
        let unexpected: Vec<String> = checkpoint
            .names()
            .filter(|name| !declared.contains_key(*name))
            .map(str::to_string)
            .collect();
        if !unexpected.is_empty() {
            return Err(PruneError::UnexpectedTensors { tensors: unexpected });
        }
        Ok(())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>3}  {:>16}  {:>3}  {:>10}  {:<10} {:>8}",
            "", "from", "n", "params", "module", "c_out"
        )?;
        for layer in &self.layers {
            let from = if layer.sources.is_empty() {
                "input".to_string()
            } else {
                format!("{:?}", layer.sources)
            };
            writeln!(
                f,
                "{:>3}  {:>16}  {:>3}  {:>10}  {:<10} {:>8}",
                layer.index,
                from,
                layer.repeat,
                layer.num_params(),
                layer.kind.name(),
                layer.out_channels
            )?;
        }
        write!(
            f,
            "{} layers, {} parameters",
            self.layers.len(),
            self.num_params()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;
    use crate::topology::Preset;

    fn dense_yolov5s() -> Network {
        let desc = Preset::Yolov5s.descriptor(80).unwrap();
        build(&desc, &DenseWidths).unwrap().0
    }

    #[test]
    fn test_conv_block_tensor_names() {
        let block = ConvBn {
            id: "model.2.m.0.cv1".to_string(),
            c_in: 32,
            c_out: 32,
            kernel: 1,
            role: ConvRole::BottleneckReduce,
        };
        let mut out = BTreeMap::new();
        block.declare(&mut out);
        assert_eq!(out.len(), 6);
        assert_eq!(out["model.2.m.0.cv1.conv.weight"], vec![32, 32, 1, 1]);
        assert_eq!(out["model.2.m.0.cv1.bn.running_var"], vec![32]);
        assert!(out["model.2.m.0.cv1.bn.num_batches_tracked"].is_empty());
    }

    #[test]
    fn test_yolov5s_declared_shapes() {
        let net = dense_yolov5s();
        assert_eq!(net.len(), 25);
        let declared = net.declared_tensors();
        assert!(declared.contains_key("model.24.anchors"));
        assert_eq!(declared["model.24.m.2.weight"], vec![255, 512, 1, 1]);
        assert_eq!(declared["model.0.conv.weight"], vec![32, 3, 6, 6]);
        assert_eq!(declared["model.9.cv2.conv.weight"], vec![512, 1024, 1, 1]);
    }

    #[test]
    fn test_exclusion_set_covers_residual_blocks_only() {
        let net = dense_yolov5s();
        let excluded = net.exclusion_set();
        assert!(excluded.contains("model.2.cv1.bn"));
        assert!(excluded.contains("model.2.m.0.cv1.bn"));
        assert!(excluded.contains("model.2.m.0.cv2.bn"));
        assert!(!excluded.contains("model.2.cv2.bn"));
        assert!(!excluded.contains("model.2.cv3.bn"));
        // Neck C3 blocks are declared without shortcut.
        assert!(!excluded.contains("model.13.cv1.bn"));
        assert!(!excluded.contains("model.13.m.0.cv1.bn"));
        assert!(!excluded.contains("model.0.bn"));
    }

    #[test]
    fn test_validate_checkpoint_reports_discrepancies() {
        let net = dense_yolov5s();
        let mut ckpt = Checkpoint::zeros_for(&net);
        net.validate_checkpoint(&ckpt).unwrap();

        ckpt.insert("model.0.bn.weight".to_string(), Tensor::zeros(&[16]));
        let err = net.validate_checkpoint(&ckpt).unwrap_err();
        assert!(matches!(err, PruneError::ShapeMismatch { .. }));

        let mut ckpt = Checkpoint::zeros_for(&net);
        ckpt.insert("model.99.bn.weight".to_string(), Tensor::zeros(&[4]));
        let err = net.validate_checkpoint(&ckpt).unwrap_err();
        assert!(matches!(err, PruneError::UnexpectedTensors { .. }));
    }

    #[test]
    fn test_display_lists_every_layer() {
        let net = dense_yolov5s();
        let table = net.to_string();
        assert!(table.contains("SPPF"));
        assert!(table.contains("Detect"));
        assert!(table.ends_with("parameters"));
    }
}
