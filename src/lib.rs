//! Aprender Prune: structured batch-norm channel pruning for YOLOv5 detectors.
//!
//! Scores every batch-norm channel by the magnitude of its learned scale,
//! derives per-layer keep masks from one global threshold, rebuilds a
//! narrower network from the same topology and transplants the surviving
//! weights into it.
//!
//! # Quick Start
//!
//! ```no_run
//! use aprender_prune::prelude::*;
//!
//! let (checkpoint, _) = load_checkpoint("yolov5s.safetensors")?;
//! let descriptor = Preset::Yolov5s.descriptor(80)?;
//!
//! let outcome = Pruner::new(descriptor, PruneOptions::new(0.3)).run(checkpoint)?;
//! println!("{}", outcome.summary);
//!
//! save_checkpoint(
//!     "yolov5s_pruned_0.3.safetensors",
//!     &outcome.checkpoint,
//!     SafeTensorsDType::F16,
//!     &outcome.metadata("yolov5s.safetensors"),
//! )?;
//! # Ok::<(), aprender_prune::PruneError>(())
//! ```
//!
//! # Modules
//!
//! - [`topology`]: Declarative macro-architecture (JSON documents, presets)
//! - [`network`]: Network graphs and channel provenance realized from a topology
//! - [`pruning`]: Channel masks, global thresholding, weight transplant
//! - [`pipeline`]: End-to-end pruning run and summaries
//! - [`serialization`]: Checkpoint I/O (SafeTensors format)
//! - [`config`]: Run options from TOML files and CLI flags

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod prelude;
pub mod pruning;
pub mod serialization;
pub mod tensor;
pub mod topology;

#[cfg(test)]
pub(crate) mod test_utils;

pub use checkpoint::Checkpoint;
pub use error::{PruneError, Result};
pub use tensor::{ElementKind, Tensor};
