//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use aprender_prune::prelude::*;
//! ```

pub use crate::checkpoint::Checkpoint;
pub use crate::error::{PruneError, Result};
pub use crate::network::{build, DenseWidths, Network};
pub use crate::pipeline::{PruneOptions, PruneOutcome, Pruner};
pub use crate::pruning::{ChannelMask, ChannelScorer, MaskDictionary};
pub use crate::serialization::{load_checkpoint, save_checkpoint, SafeTensorsDType};
pub use crate::tensor::{ElementKind, Tensor};
pub use crate::topology::{Preset, TopologyDescriptor};
