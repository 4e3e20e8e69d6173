//! Built-in YOLOv5 descriptors.

use super::{ModelDocument, TopologyDescriptor};
use crate::checkpoint::Checkpoint;
use crate::error::{PruneError, Result};
use std::fmt;
use std::str::FromStr;

const YOLOV5S_BACKBONE: &str = r#"[
    [-1, 1, "Conv", [64, 6, 2, 2]],
    [-1, 1, "Conv", [128, 3, 2]],
    [-1, 3, "C3", [128]],
    [-1, 1, "Conv", [256, 3, 2]],
    [-1, 6, "C3", [256]],
    [-1, 1, "Conv", [512, 3, 2]],
    [-1, 9, "C3", [512]],
    [-1, 1, "Conv", [1024, 3, 2]],
    [-1, 3, "C3", [1024]],
    [-1, 1, "SPPF", [1024, 5]]
]"#;

/// Neck entries; the head row is appended per preset.
const YOLOV5S_NECK: &str = r#"
    [-1, 1, "Conv", [512, 1, 1]],
    [-1, 1, "nn.Upsample", [null, 2, "nearest"]],
    [[-1, 6], 1, "Concat", [1]],
    [-1, 3, "C3", [512, false]],

    [-1, 1, "Conv", [256, 1, 1]],
    [-1, 1, "nn.Upsample", [null, 2, "nearest"]],
    [[-1, 4], 1, "Concat", [1]],
    [-1, 3, "C3", [256, false]],

    [-1, 1, "Conv", [256, 3, 2]],
    [[-1, 14], 1, "Concat", [1]],
    [-1, 3, "C3", [512, false]],

    [-1, 1, "Conv", [512, 3, 2]],
    [[-1, 10], 1, "Concat", [1]],
    [-1, 3, "C3", [1024, false]]
"#;

const DETECT_HEAD: &str = r#"[[17, 20, 23], 1, "Detect", ["nc", "anchors"]]"#;
const SEGMENT_HEAD: &str = r#"[[17, 20, 23], 1, "Segment", ["nc", "anchors", 32, 256]]"#;

/// P3/8, P4/16, P5/32 anchors.
const YOLOV5_ANCHORS: &str =
    "[[10, 13, 16, 30, 33, 23], [30, 61, 62, 45, 59, 119], [116, 90, 156, 198, 373, 326]]";

const ANCHORS_PER_SCALE: usize = 3;
const MASK_PROTOTYPES: usize = 32;
const HEAD_BIAS: &str = "model.24.m.0.bias";

/// Built-in architecture presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// YOLOv5s detection.
    Yolov5s,
    /// YOLOv5s instance segmentation.
    Yolov5sSeg,
}

impl Preset {
    /// All presets.
    pub const ALL: [Preset; 2] = [Preset::Yolov5s, Preset::Yolov5sSeg];

    /// Preset name as accepted on the command line.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Preset::Yolov5s => "yolov5s",
            Preset::Yolov5sSeg => "yolov5s-seg",
        }
    }

    /// The preset as a JSON model document.
    #[must_use]
    pub fn document_json(self, nc: usize) -> String {
        let head = match self {
            Preset::Yolov5s => DETECT_HEAD,
            Preset::Yolov5sSeg => SEGMENT_HEAD,
        };
        let neck = YOLOV5S_NECK.trim();
        format!(
            r#"{{"nc": {nc}, "depth_multiple": 0.33, "width_multiple": 0.50,
                "anchors": {YOLOV5_ANCHORS},
                "backbone": {YOLOV5S_BACKBONE},
                "head": [{neck}, {head}]}}"#
        )
    }

    /// Class count implied by the width of the checkpoint's first head bias.
    ///
    /// # Errors
    ///
    /// Returns an error if the bias is missing or its width does not fit
    /// this preset's head layout.
    pub fn infer_classes(self, checkpoint: &Checkpoint) -> Result<usize> {
        let box_terms = match self {
            Preset::Yolov5s => 5,
            Preset::Yolov5sSeg => 5 + MASK_PROTOTYPES,
        };
        let outputs = checkpoint.require(HEAD_BIAS)?.numel();
        if outputs % ANCHORS_PER_SCALE != 0 || outputs / ANCHORS_PER_SCALE <= box_terms {
            return Err(PruneError::Config(format!(
                "'{HEAD_BIAS}' has {outputs} outputs, which does not match the {self} head layout"
            )));
        }
        Ok(outputs / ANCHORS_PER_SCALE - box_terms)
    }

    /// Resolve the preset into a descriptor for `nc` classes.
    ///
    /// # Errors
    ///
    /// Only fails if the embedded document is invalid.
    pub fn descriptor(self, nc: usize) -> Result<TopologyDescriptor> {
        let doc: ModelDocument = serde_json::from_str(&self.document_json(nc))?;
        TopologyDescriptor::from_document(&doc)
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = PruneError;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                PruneError::Config(format!(
                    "unknown preset '{s}', expected one of: yolov5s, yolov5s-seg"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::LayerKind;

    #[test]
    fn test_yolov5s_has_25_entries() {
        let desc = Preset::Yolov5s.descriptor(80).unwrap();
        assert_eq!(desc.len(), 25);
        assert!(desc.entries[24].kind.is_head());
        assert_eq!(desc.width(1024), 512);
    }

    #[test]
    fn test_seg_preset_head() {
        let desc = Preset::Yolov5sSeg.descriptor(3).unwrap();
        match &desc.entries[24].kind {
            LayerKind::Segment { nc, nm, npr, anchors } => {
                assert_eq!((*nc, *nm, *npr), (3, 32, 256));
                assert_eq!(anchors.num_scales(), 3);
            }
            other => panic!("expected Segment, got {other:?}"),
        }
    }

    #[test]
    fn test_infer_classes_from_head_bias() {
        use crate::tensor::Tensor;
        let mut ckpt = Checkpoint::new();
        ckpt.insert(HEAD_BIAS.to_string(), Tensor::zeros(&[255]));
        assert_eq!(Preset::Yolov5s.infer_classes(&ckpt).unwrap(), 80);

        ckpt.insert(HEAD_BIAS.to_string(), Tensor::zeros(&[100]));
        assert!(Preset::Yolov5s.infer_classes(&ckpt).is_err());

        ckpt.insert(HEAD_BIAS.to_string(), Tensor::zeros(&[3 * (5 + 32)]));
        assert!(Preset::Yolov5sSeg.infer_classes(&ckpt).is_err());

        ckpt.insert(HEAD_BIAS.to_string(), Tensor::zeros(&[3 * (2 + 5 + 32)]));
        assert_eq!(Preset::Yolov5sSeg.infer_classes(&ckpt).unwrap(), 2);
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("yolov5s".parse::<Preset>().unwrap(), Preset::Yolov5s);
        assert_eq!("YOLOv5s-seg".parse::<Preset>().unwrap(), Preset::Yolov5sSeg);
        assert!("yolov8n".parse::<Preset>().is_err());
    }
}
