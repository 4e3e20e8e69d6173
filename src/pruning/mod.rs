//! Structured channel pruning of batch-normalized conv networks.
//!
//! Channels are scored by the magnitude of their batch-norm scale (gamma)
//! over one global pool, masked against a single threshold, and physically
//! removed by transplanting the surviving weights into a narrower network
//! realized from the same topology.
//!
//! # Toyota Way Principles
//! - **Jidoka**: non-finite scales and starved layers stop the run before
//!   any weight is modified
//! - **Poka-Yoke**: every transplanted tensor is shape-checked against the
//!   rebuilt network's declaration
//!
//! # Example
//!
//! ```ignore
//! use aprender_prune::pruning::{transplant, ChannelScorer};
//! use aprender_prune::network::{build, DenseWidths};
//!
//! let (dense, _) = build(&descriptor, &DenseWidths)?;
//! let scorer = ChannelScorer::new(0.3)?;
//! let (masks, report) =
//!     scorer.apply(&mut checkpoint, &dense.norm_ids(), &dense.exclusion_set())?;
//! let (rebuilt, provenance) = build(&descriptor, &masks)?;
//! let pruned = transplant(&checkpoint, &rebuilt, &masks, &provenance)?;
//! ```
//!
//! # References
//! - Liu, Z., et al. (2017). Learning efficient convolutional networks
//!   through network slimming. ICCV.

mod mask;
mod scorer;
mod transplant;

pub use mask::{ChannelMask, MaskDictionary};
pub use scorer::{zero_dropped_channels, ChannelScorer, ThresholdReport, MIN_CHANNELS};
pub use transplant::transplant;
