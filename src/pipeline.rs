//! End-to-end pruning run: validate, score, rebuild, transplant.

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::network::{build, DenseWidths, Network, ProvenanceMap};
use crate::pruning::{transplant, ChannelScorer, MaskDictionary, ThresholdReport, MIN_CHANNELS};
use crate::serialization::UserMetadata;
use crate::topology::TopologyDescriptor;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PruneOptions {
    /// Prune ratio in `[0, 1)`.
    pub ratio: f64,
    /// Channels every scored layer keeps.
    pub min_channels: usize,
}

impl PruneOptions {
    /// Options for `ratio` with the default channel floor.
    #[must_use]
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            min_channels: MIN_CHANNELS,
        }
    }
}

/// Retained channels of one normalization layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    /// Normalization layer identity.
    pub layer: String,
    /// Original channels.
    pub original: usize,
    /// Retained channels.
    pub retained: usize,
    /// Kept whole by the exclusion set.
    pub excluded: bool,
}

/// Per-layer and total channel counts of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    /// Layers in network order.
    pub layers: Vec<LayerSummary>,
    /// Sum of original channels.
    pub total_original: usize,
    /// Sum of retained channels.
    pub total_retained: usize,
    /// Parameters and buffers of the dense network.
    pub params_before: usize,
    /// Parameters and buffers of the pruned network.
    pub params_after: usize,
}

impl PruneSummary {
    fn new(
        dense: &Network,
        rebuilt: &Network,
        masks: &MaskDictionary,
        excluded: &BTreeSet<String>,
    ) -> Self {
        let layers: Vec<LayerSummary> = dense
            .norm_ids()
            .into_iter()
            .filter_map(|layer| {
                let mask = masks.get(&layer)?;
                Some(LayerSummary {
                    excluded: excluded.contains(&layer),
                    original: mask.len(),
                    retained: mask.count(),
                    layer,
                })
            })
            .collect();
        Self {
            total_original: layers.iter().map(|l| l.original).sum(),
            total_retained: layers.iter().map(|l| l.retained).sum(),
            params_before: dense.num_params(),
            params_after: rebuilt.num_params(),
            layers,
        }
    }

    /// Fraction of channels removed.
    #[must_use]
    pub fn channel_reduction(&self) -> f32 {
        if self.total_original == 0 {
            0.0
        } else {
            1.0 - self.total_retained as f32 / self.total_original as f32
        }
    }
}

impl fmt::Display for PruneSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(72);
        writeln!(f, "{rule}")?;
        writeln!(
            f,
            "| {:<32} | {:>15} | {:>15} |",
            "layer name", "origin channels", "remaining"
        )?;
        writeln!(f, "{rule}")?;
        for l in &self.layers {
            let marker = if l.excluded { " *" } else { "" };
            writeln!(
                f,
                "| {:<32} | {:>15} | {:>15} |",
                format!("{}{marker}", l.layer),
                l.original,
                l.retained
            )?;
        }
        writeln!(f, "{rule}")?;
        writeln!(
            f,
            "| {:<32} | {:>15} | {:>15} |",
            "total", self.total_original, self.total_retained
        )?;
        writeln!(f, "{rule}")?;
        write!(
            f,
            "parameters {} -> {} (* = kept whole)",
            self.params_before, self.params_after
        )
    }
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct PruneOutcome {
    /// Populated checkpoint of the pruned network.
    pub checkpoint: Checkpoint,
    /// The pruned network.
    pub network: Network,
    /// Masks of every normalization layer.
    pub masks: MaskDictionary,
    /// Provenance of the pruned network.
    pub provenance: ProvenanceMap,
    /// Channel counts.
    pub summary: PruneSummary,
    /// Threshold selection.
    pub report: ThresholdReport,
}

#[derive(Serialize)]
struct RunReport<'a> {
    source: &'a str,
    threshold: &'a ThresholdReport,
    summary: &'a PruneSummary,
}

impl PruneOutcome {
    /// SafeTensors user metadata describing the run.
    #[must_use]
    pub fn metadata(&self, source: &str) -> UserMetadata {
        let mut meta = UserMetadata::new();
        meta.insert("prune.ratio".to_string(), self.report.ratio.to_string());
        meta.insert("prune.threshold".to_string(), self.report.threshold.to_string());
        meta.insert("prune.source".to_string(), source.to_string());
        meta.insert(
            "prune.retained_channels".to_string(),
            self.summary.total_retained.to_string(),
        );
        meta
    }

    /// JSON report of the threshold and per-layer retained counts.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PruneError::Serialization`] if encoding fails.
    pub fn report_json(&self, source: &str) -> Result<String> {
        Ok(serde_json::to_string_pretty(&RunReport {
            source,
            threshold: &self.report,
            summary: &self.summary,
        })?)
    }
}

/// Dense network plus the threshold a ratio would select.
#[derive(Debug, Clone)]
pub struct Inspection {
    /// Dense network.
    pub network: Network,
    /// Normalization layers kept whole.
    pub excluded: BTreeSet<String>,
    /// Threshold selection.
    pub report: ThresholdReport,
}

/// Runs pruning for one topology.
#[derive(Debug, Clone)]
pub struct Pruner {
    descriptor: TopologyDescriptor,
    options: PruneOptions,
}

impl Pruner {
    /// Create a pruner.
    #[must_use]
    pub fn new(descriptor: TopologyDescriptor, options: PruneOptions) -> Self {
        Self {
            descriptor,
            options,
        }
    }

    /// Topology in use.
    #[must_use]
    pub fn descriptor(&self) -> &TopologyDescriptor {
        &self.descriptor
    }

    /// Run options.
    #[must_use]
    pub fn options(&self) -> PruneOptions {
        self.options
    }

    fn scorer(&self) -> Result<ChannelScorer> {
        Ok(ChannelScorer::new(self.options.ratio)?.with_min_channels(self.options.min_channels))
    }

    /// Validate `checkpoint` and report the threshold without mutating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint does not match the topology or
    /// the pool cannot be analyzed.
    pub fn inspect(&self, checkpoint: &Checkpoint) -> Result<Inspection> {
        let scorer = self.scorer()?;
        let (network, _) = build(&self.descriptor, &DenseWidths)?;
        network.validate_checkpoint(checkpoint)?;
        let excluded = network.exclusion_set();
        let report = scorer.analyze(checkpoint, &network.norm_ids(), &excluded)?;
        Ok(Inspection {
            network,
            excluded,
            report,
        })
    }

    /// Prune `checkpoint`.
    ///
    /// The input is consumed: its dropped scales and shifts are zeroed
    /// before the surviving weights are transplanted.
    ///
    /// # Errors
    ///
    /// Returns the first validation, scoring, topology or transplant error.
    /// On error no pruned checkpoint exists.
    pub fn run(&self, mut checkpoint: Checkpoint) -> Result<PruneOutcome> {
        let scorer = self.scorer()?;

        let (dense, _) = build(&self.descriptor, &DenseWidths)?;
        info!(layers = dense.len(), tensors = checkpoint.len(), "dense network realized");
        debug!("\n{dense}");
        dense.validate_checkpoint(&checkpoint)?;

        let excluded = dense.exclusion_set();
        info!(
            norms = dense.norm_ids().len(),
            excluded = excluded.len(),
            ratio = self.options.ratio,
            "scoring channels"
        );
        let (masks, report) = scorer.apply(&mut checkpoint, &dense.norm_ids(), &excluded)?;

        let (network, provenance) = build(&self.descriptor, &masks)?;
        let summary = PruneSummary::new(&dense, &network, &masks, &excluded);
        info!("\n{summary}");

        let pruned = transplant(&checkpoint, &network, &masks, &provenance)?;
        info!(
            channels_before = summary.total_original,
            channels_after = summary.total_retained,
            params_before = summary.params_before,
            params_after = summary.params_after,
            "pruning complete"
        );
        Ok(PruneOutcome {
            checkpoint: pruned,
            network,
            masks,
            provenance,
            summary,
            report,
        })
    }
}

/// `<dir>/<stem>_pruned_<ratio>.safetensors` next to `weights`.
#[must_use]
pub fn default_output_path(weights: &Path, ratio: f64) -> PathBuf {
    let stem = weights
        .file_stem()
        .map_or_else(|| "model".into(), |s| s.to_string_lossy());
    weights.with_file_name(format!("{stem}_pruned_{ratio}.safetensors"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::synthetic_checkpoint;
    use crate::topology::Preset;

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("runs/best.safetensors"), 0.3),
            PathBuf::from("runs/best_pruned_0.3.safetensors")
        );
        assert_eq!(
            default_output_path(Path::new("weights"), 0.5),
            PathBuf::from("weights_pruned_0.5.safetensors")
        );
    }

    #[test]
    fn test_run_reports_consistent_totals() {
        let desc = Preset::Yolov5s.descriptor(2).unwrap();
        let (dense, _) = build(&desc, &DenseWidths).unwrap();
        let ckpt = synthetic_checkpoint(&dense, 7);

        let outcome = Pruner::new(desc, PruneOptions::new(0.4)).run(ckpt).unwrap();
        assert_eq!(outcome.summary.total_retained, outcome.masks.total_retained());
        assert!(outcome.summary.params_after < outcome.summary.params_before);
        assert!(outcome.summary.channel_reduction() > 0.0);
        assert!(outcome.summary.to_string().contains("model.0.bn"));

        let meta = outcome.metadata("best.safetensors");
        assert_eq!(meta["prune.ratio"], "0.4");
        assert_eq!(meta["prune.source"], "best.safetensors");

        let json: serde_json::Value =
            serde_json::from_str(&outcome.report_json("best.safetensors").unwrap()).unwrap();
        assert_eq!(
            json["summary"]["layers"].as_array().unwrap().len(),
            dense.norm_ids().len()
        );
    }

    #[test]
    fn test_inspect_leaves_checkpoint_untouched() {
        let desc = Preset::Yolov5s.descriptor(2).unwrap();
        let (dense, _) = build(&desc, &DenseWidths).unwrap();
        let ckpt = synthetic_checkpoint(&dense, 11);
        let before = ckpt.clone();

        let inspection = Pruner::new(desc, PruneOptions::new(0.5))
            .inspect(&ckpt)
            .unwrap();
        assert_eq!(ckpt, before);
        assert_eq!(inspection.report.ratio, 0.5);
        assert!(inspection.excluded.contains("model.2.cv1.bn"));
        assert_eq!(
            inspection.report.pool_size,
            dense
                .conv_blocks()
                .filter(|b| !inspection.excluded.contains(&b.norm_id()))
                .map(|b| b.c_out)
                .sum::<usize>()
        );
    }
}
