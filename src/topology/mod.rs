//! Topology descriptor: the declarative macro-architecture of a detector.
//!
//! A descriptor is an ordered list of `(from, number, module, args)`
//! entries (backbone followed by head) plus model-level scalars. It is pure
//! data; [`crate::network::build`] turns it into a concrete network.
//!
//! # Format
//!
//! ```json
//! {
//!   "nc": 80, "depth_multiple": 0.33, "width_multiple": 0.5,
//!   "anchors": [[10,13, 16,30, 33,23], [30,61, 62,45, 59,119], [116,90, 156,198, 373,326]],
//!   "backbone": [[-1, 1, "Conv", [64, 6, 2, 2]], [-1, 3, "C3", [128]]],
//!   "head": [[[17, 20, 23], 1, "Detect", ["nc", "anchors"]]]
//! }
//! ```
//!
//! Module names are resolved through a closed registry when the document
//! is parsed, so an unknown kind fails before any network is built.

mod presets;
mod registry;

pub use presets::Preset;

use crate::error::{PruneError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Channel count of an RGB image, the default network input.
pub const DEFAULT_INPUT_CHANNELS: usize = 3;

/// Source reference of a topology entry: `-1` is the previous entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    /// A single source (`-1` or an explicit index).
    One(i64),
    /// Several sources, in order (concatenation and heads).
    Many(Vec<i64>),
}

impl SourceRef {
    /// Source references in declaration order.
    #[must_use]
    pub fn refs(&self) -> Vec<i64> {
        match self {
            SourceRef::One(r) => vec![*r],
            SourceRef::Many(rs) => rs.clone(),
        }
    }

    /// Number of referenced sources.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            SourceRef::One(_) => 1,
            SourceRef::Many(rs) => rs.len(),
        }
    }

    /// True if no source is referenced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anchor boxes of a detection head, one list of `(w, h)` pairs per scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchors {
    per_scale: Vec<Vec<f32>>,
}

impl Anchors {
    /// Create anchors from flat per-scale `[w0, h0, w1, h1, ...]` lists.
    ///
    /// # Errors
    ///
    /// Returns an error if a list has odd length or scales disagree on the
    /// number of anchors.
    pub fn new(per_scale: Vec<Vec<f32>>) -> std::result::Result<Self, String> {
        let Some(first) = per_scale.first() else {
            return Err("anchor list is empty".to_string());
        };
        if first.is_empty() || first.len() % 2 != 0 {
            return Err(format!("anchor list has odd or zero length {}", first.len()));
        }
        if per_scale.iter().any(|s| s.len() != first.len()) {
            return Err("every scale must declare the same number of anchors".to_string());
        }
        Ok(Self { per_scale })
    }

    /// Placeholder anchors for `count` anchors per scale over `scales` scales.
    #[must_use]
    pub fn placeholder(count: usize, scales: usize) -> Self {
        let row: Vec<f32> = (0..count * 2).map(|v| v as f32).collect();
        Self {
            per_scale: vec![row; scales],
        }
    }

    /// Number of detection scales (`nl`).
    #[must_use]
    pub fn num_scales(&self) -> usize {
        self.per_scale.len()
    }

    /// Anchors per scale (`na`).
    #[must_use]
    pub fn per_scale_count(&self) -> usize {
        self.per_scale.first().map_or(0, |s| s.len() / 2)
    }

    /// Flattened `[nl, na, 2]` values.
    #[must_use]
    pub fn flatten(&self) -> Vec<f32> {
        self.per_scale.iter().flatten().copied().collect()
    }
}

/// Layer kind with exactly the arguments its construction needs.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    /// Convolution + batch-norm + activation.
    Conv {
        /// Nominal output channels (before width gain)
        c2: usize,
        /// Kernel size
        kernel: usize,
        /// Stride
        stride: usize,
    },
    /// Cross-stage block: entry, side and exit convolutions around a
    /// bottleneck chain.
    C3 {
        /// Nominal output channels (before width gain)
        c2: usize,
        /// Residual bottlenecks
        shortcut: bool,
    },
    /// Spatial pyramid pooling (fast): entry conv, three chained max-pools,
    /// exit conv over four concatenated copies.
    Sppf {
        /// Nominal output channels (before width gain)
        c2: usize,
        /// Pooling kernel size
        kernel: usize,
    },
    /// Nearest-neighbour upsampling.
    Upsample {
        /// Scale factor
        scale: usize,
    },
    /// Channel concatenation.
    Concat {
        /// Concatenation dimension
        dim: usize,
    },
    /// Detection head.
    Detect {
        /// Number of classes
        nc: usize,
        /// Anchor boxes
        anchors: Anchors,
    },
    /// Detection head with a mask prototype branch.
    Segment {
        /// Number of classes
        nc: usize,
        /// Anchor boxes
        anchors: Anchors,
        /// Number of mask prototypes
        nm: usize,
        /// Nominal prototype branch width (before width gain)
        npr: usize,
    },
}

impl LayerKind {
    /// Module name as it appears in descriptors and summaries.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Conv { .. } => "Conv",
            LayerKind::C3 { .. } => "C3",
            LayerKind::Sppf { .. } => "SPPF",
            LayerKind::Upsample { .. } => "Upsample",
            LayerKind::Concat { .. } => "Concat",
            LayerKind::Detect { .. } => "Detect",
            LayerKind::Segment { .. } => "Segment",
        }
    }

    /// True for output heads.
    #[must_use]
    pub fn is_head(&self) -> bool {
        matches!(self, LayerKind::Detect { .. } | LayerKind::Segment { .. })
    }
}

/// One resolved entry of the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyEntry {
    /// Source reference(s).
    pub from: SourceRef,
    /// Declared repeat count (before depth gain).
    pub repeat: usize,
    /// Layer kind and arguments.
    pub kind: LayerKind,
}

/// Anchor specification as written in a document: explicit boxes or a count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnchorSpec {
    /// Explicit per-scale anchor lists.
    Boxes(Vec<Vec<f32>>),
    /// Number of anchors per scale.
    Count(usize),
}

/// Raw `[from, number, module, args]` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntry(
    pub SourceRef,
    pub usize,
    pub String,
    pub Vec<serde_json::Value>,
);

fn default_depth() -> f32 {
    1.0
}

fn default_input_channels() -> usize {
    DEFAULT_INPUT_CHANNELS
}

/// Model document as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDocument {
    /// Number of classes
    pub nc: usize,
    /// Depth gain
    #[serde(default = "default_depth")]
    pub depth_multiple: f32,
    /// Width gain
    #[serde(default = "default_depth")]
    pub width_multiple: f32,
    /// Anchor boxes
    pub anchors: AnchorSpec,
    /// Input image channels
    #[serde(default = "default_input_channels")]
    pub ch: usize,
    /// Backbone entries
    pub backbone: Vec<RawEntry>,
    /// Head entries
    pub head: Vec<RawEntry>,
}

/// Parsed, registry-resolved topology descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyDescriptor {
    /// Number of classes
    pub nc: usize,
    /// Depth gain applied to repeat counts
    pub depth_multiple: f32,
    /// Width gain applied to nominal channel counts
    pub width_multiple: f32,
    /// Input image channels
    pub input_channels: usize,
    /// Entries in declaration order (backbone then head)
    pub entries: Vec<TopologyEntry>,
}

impl TopologyDescriptor {
    /// Resolve a model document through the layer registry.
    ///
    /// # Errors
    ///
    /// Returns a topology error for unknown module names or malformed
    /// arguments.
    pub fn from_document(doc: &ModelDocument) -> Result<Self> {
        if !(doc.depth_multiple > 0.0) || !(doc.width_multiple > 0.0) {
            return Err(PruneError::Config(format!(
                "depth_multiple ({}) and width_multiple ({}) must be positive",
                doc.depth_multiple, doc.width_multiple
            )));
        }

        let mut entries = Vec::with_capacity(doc.backbone.len() + doc.head.len());
        for (index, raw) in doc.backbone.iter().chain(doc.head.iter()).enumerate() {
            let RawEntry(from, repeat, module, args) = raw;
            let constructor =
                registry::resolve(module).ok_or_else(|| PruneError::UnknownKind {
                    index,
                    kind: module.clone(),
                })?;
            let ctx = registry::Context {
                index,
                nc: doc.nc,
                anchors: &doc.anchors,
                num_sources: from.len(),
            };
            let kind = constructor(args, &ctx)?;
            if *repeat == 0 {
                return Err(PruneError::InvalidEntry {
                    index,
                    message: "repeat count must be at least 1".to_string(),
                });
            }
            entries.push(TopologyEntry {
                from: from.clone(),
                repeat: *repeat,
                kind,
            });
        }

        Ok(Self {
            nc: doc.nc,
            depth_multiple: doc.depth_multiple,
            width_multiple: doc.width_multiple,
            input_channels: doc.ch,
            entries,
        })
    }

    /// Parse a JSON model document.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid JSON or an invalid topology.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: ModelDocument = serde_json::from_str(json)?;
        Self::from_document(&doc)
    }

    /// Load a JSON model document from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PruneError::FileNotFound(path.to_path_buf()));
        }
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Repeat count after depth gain.
    #[must_use]
    pub fn depth(&self, repeat: usize) -> usize {
        if repeat > 1 {
            ((repeat as f32 * self.depth_multiple).round() as usize).max(1)
        } else {
            repeat
        }
    }

    /// Channel count after width gain.
    #[must_use]
    pub fn width(&self, channels: usize) -> usize {
        make_divisible(channels as f32 * self.width_multiple, 8)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Round `x` up to the nearest multiple of `divisor`.
#[must_use]
pub fn make_divisible(x: f32, divisor: usize) -> usize {
    let d = divisor as f32;
    ((x / d).ceil() * d) as usize
}
