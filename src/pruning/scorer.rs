//! Global batch-norm scale thresholding (network slimming).
//!
//! # Algorithm
//! 1. Pool `|gamma|` of every normalization layer outside the exclusion set.
//! 2. Sort ascending; the threshold is the pool value at rank
//!    `floor(ratio * pool_size)`.
//! 3. Keep channel c iff `|gamma[c]| >= threshold`; excluded layers keep
//!    every channel.
//! 4. Force the `min_channels` largest channels of a starved layer back in.
//! 5. Zero gamma and beta of the remaining dropped channels.
//!
//! # Toyota Way: Jidoka
//! Every mask is computed and validated before the checkpoint is touched, so
//! a failing run leaves the weights exactly as loaded.
//!
//! # References
//! - Liu, Z., et al. (2017). Learning efficient convolutional networks
//!   through network slimming. ICCV.

use super::mask::{ChannelMask, MaskDictionary};
use crate::checkpoint::Checkpoint;
use crate::error::{PruneError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Minimum channels every scored layer keeps.
pub const MIN_CHANNELS: usize = 2;

/// Statistics of the global scale pool and the selected threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdReport {
    /// Requested prune ratio.
    pub ratio: f64,
    /// Number of pooled channels.
    pub pool_size: usize,
    /// Selected threshold.
    pub threshold: f32,
    /// Smallest per-layer maximum; thresholds above it empty a layer.
    pub highest_threshold: f32,
    /// Rank fraction of `highest_threshold` in the pool.
    pub percent_limit: f64,
    /// Pool minimum.
    pub min: f32,
    /// Pool maximum.
    pub max: f32,
    /// Pool mean.
    pub mean: f32,
}

impl fmt::Display for ThresholdReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pool: {} channels, |gamma| min {:.4} / mean {:.4} / max {:.4}",
            self.pool_size, self.min, self.mean, self.max
        )?;
        writeln!(
            f,
            "suggested threshold < {:.4} (prune ratio {:.3})",
            self.highest_threshold, self.percent_limit
        )?;
        write!(
            f,
            "ratio {:.3} selects threshold {:.4}",
            self.ratio, self.threshold
        )
    }
}

/// Produces channel masks from batch-norm scales.
#[derive(Debug, Clone)]
pub struct ChannelScorer {
    ratio: f64,
    min_channels: usize,
}

impl ChannelScorer {
    /// Create a scorer for prune ratio `ratio`.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::InvalidRatio`] unless `0 <= ratio < 1`.
    pub fn new(ratio: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&ratio) {
            return Err(PruneError::InvalidRatio { value: ratio });
        }
        Ok(Self {
            ratio,
            min_channels: MIN_CHANNELS,
        })
    }

    /// Override the per-layer channel floor.
    #[must_use]
    pub fn with_min_channels(mut self, min_channels: usize) -> Self {
        self.min_channels = min_channels;
        self
    }

    /// Prune ratio.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Per-layer channel floor.
    #[must_use]
    pub fn min_channels(&self) -> usize {
        self.min_channels
    }

    /// Pool statistics and the threshold this ratio selects.
    ///
    /// # Errors
    ///
    /// Returns an error if a scale tensor is missing or non-finite, or
    /// every layer is excluded.
    pub fn analyze(
        &self,
        checkpoint: &Checkpoint,
        norm_ids: &[String],
        excluded: &BTreeSet<String>,
    ) -> Result<ThresholdReport> {
        let mut pool = Vec::new();
        let mut highest_threshold = f32::INFINITY;
        for norm in norm_ids.iter().filter(|n| !excluded.contains(*n)) {
            let scales = abs_scales(checkpoint, norm)?;
            if let Some(layer_max) = scales.iter().copied().reduce(f32::max) {
                highest_threshold = highest_threshold.min(layer_max);
            }
            pool.extend(scales);
        }
        if pool.is_empty() {
            return Err(PruneError::EmptyPool);
        }
        pool.sort_by(f32::total_cmp);

        let n = pool.len();
        let rank = ((self.ratio * n as f64).floor() as usize).min(n - 1);
        let limit_rank = pool.partition_point(|&v| v < highest_threshold);

        Ok(ThresholdReport {
            ratio: self.ratio,
            pool_size: n,
            threshold: pool[rank],
            highest_threshold,
            percent_limit: limit_rank as f64 / n as f64,
            min: pool[0],
            max: pool[n - 1],
            mean: (pool.iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64) as f32,
        })
    }

    /// Compute masks for every normalization layer without mutating anything.
    ///
    /// Deterministic: the same checkpoint and ratio yield identical masks.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::ZeroChannels`] if a layer keeps nothing after
    /// floor enforcement, plus every error of [`ChannelScorer::analyze`].
    pub fn generate_masks(
        &self,
        checkpoint: &Checkpoint,
        norm_ids: &[String],
        excluded: &BTreeSet<String>,
    ) -> Result<(MaskDictionary, ThresholdReport)> {
        let report = self.analyze(checkpoint, norm_ids, excluded)?;
        if self.ratio > report.percent_limit {
            warn!(
                ratio = self.ratio,
                percent_limit = report.percent_limit,
                "prune ratio exceeds the suggested limit; some layers fall back to the channel floor"
            );
        }

        let mut masks = MaskDictionary::new();
        for norm in norm_ids {
            let scales = abs_scales(checkpoint, norm)?;
            let mask = if excluded.contains(norm) {
                ChannelMask::all(scales.len())
            } else {
                self.layer_mask(norm, &scales, report.threshold)?
            };
            debug!(
                layer = norm.as_str(),
                original = mask.len(),
                retained = mask.count(),
                excluded = excluded.contains(norm),
                "mask"
            );
            masks.insert(norm.clone(), mask);
        }
        info!(
            threshold = report.threshold,
            retained = masks.total_retained(),
            total = masks.total_channels(),
            "channel masks generated"
        );
        Ok((masks, report))
    }

    /// Generate masks, then zero gamma and beta of dropped channels in place.
    ///
    /// Nothing is mutated if mask generation fails.
    ///
    /// # Errors
    ///
    /// See [`ChannelScorer::generate_masks`].
    pub fn apply(
        &self,
        checkpoint: &mut Checkpoint,
        norm_ids: &[String],
        excluded: &BTreeSet<String>,
    ) -> Result<(MaskDictionary, ThresholdReport)> {
        let (masks, report) = self.generate_masks(checkpoint, norm_ids, excluded)?;
        let zeroed = zero_dropped_channels(checkpoint, &masks)?;
        debug!(zeroed, "zeroed scale and shift of dropped channels");
        Ok((masks, report))
    }

    fn layer_mask(&self, norm: &str, scales: &[f32], threshold: f32) -> Result<ChannelMask> {
        let mut mask = ChannelMask::new(scales.iter().map(|&s| s >= threshold).collect());
        let floor = self.min_channels.min(scales.len());
        if mask.count() < floor {
            let mut order: Vec<usize> = (0..scales.len()).collect();
            order.sort_by(|&a, &b| scales[b].total_cmp(&scales[a]));
            for &c in order.iter().take(floor) {
                mask.keep(c);
            }
            debug!(layer = norm, floor, "channel floor enforced");
        }
        if mask.count() == 0 {
            return Err(PruneError::ZeroChannels {
                layer: norm.to_string(),
            });
        }
        Ok(mask)
    }
}

/// Zero gamma and beta of every dropped channel; returns the channel count.
///
/// # Errors
///
/// Returns [`PruneError::MissingTensor`] if a scale or shift tensor is
/// absent and [`PruneError::ShapeMismatch`] if its length differs from the
/// mask.
pub fn zero_dropped_channels(checkpoint: &mut Checkpoint, masks: &MaskDictionary) -> Result<usize> {
    let mut zeroed = 0;
    for (norm, mask) in masks.iter() {
        for suffix in ["weight", "bias"] {
            let name = format!("{norm}.{suffix}");
            let tensor = checkpoint
                .get_mut(&name)
                .ok_or_else(|| PruneError::MissingTensor {
                    tensor: name.clone(),
                })?;
            if tensor.numel() != mask.len() {
                return Err(PruneError::ShapeMismatch {
                    tensor: name,
                    expected: vec![mask.len()],
                    got: tensor.shape().to_vec(),
                });
            }
            for (value, &keep) in tensor.data_mut().iter_mut().zip(mask.as_slice()) {
                if !keep {
                    *value = 0.0;
                }
            }
        }
        zeroed += mask.len() - mask.count();
    }
    Ok(zeroed)
}

/// `|gamma|` of one normalization layer, validated finite.
fn abs_scales(checkpoint: &Checkpoint, norm: &str) -> Result<Vec<f32>> {
    let gamma = checkpoint.require(&format!("{norm}.weight"))?;
    if let Some(bad) = gamma.data().iter().find(|v| !v.is_finite()) {
        return Err(PruneError::NumericalInstability {
            layer: norm.to_string(),
            details: format!("non-finite scale {bad}"),
        });
    }
    Ok(gamma.data().iter().map(|v| v.abs()).collect())
}
