//! Error types for pruning operations.
//!
//! Every fatal condition aborts the whole run before a checkpoint is
//! written, so the variants carry enough context (layer identity, tensor
//! name, shapes) to diagnose the defect without re-running.

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

/// Result type alias for pruning operations.
pub type Result<T> = std::result::Result<T, PruneError>;

/// Pruning operation errors with detailed context.
#[derive(Error, Debug)]
pub enum PruneError {
    /// Prune ratio outside `[0, 1)`.
    #[error("Invalid prune ratio {value}: must be in [0.0, 1.0)")]
    InvalidRatio {
        /// Provided value
        value: f64,
    },

    /// No normalization layer is eligible for scoring.
    #[error("No prunable normalization layers: every layer is excluded")]
    EmptyPool,

    /// A layer would keep zero channels even after floor enforcement.
    #[error(
        "Layer '{layer}' keeps 0 channels: lower the prune ratio or retrain a sparser model"
    )]
    ZeroChannels {
        /// Normalization layer identity
        layer: String,
    },

    /// NaN/Inf found in a normalization scale.
    #[error("Numerical instability in '{layer}': {details}")]
    NumericalInstability {
        /// Normalization layer identity
        layer: String,
        /// What was detected
        details: String,
    },

    /// Module name not present in the layer registry.
    #[error("Topology entry {index}: unknown module kind '{kind}'")]
    UnknownKind {
        /// Entry index in the descriptor
        index: usize,
        /// Offending module name
        kind: String,
    },

    /// Malformed descriptor entry or arguments.
    #[error("Topology entry {index}: {message}")]
    InvalidEntry {
        /// Entry index in the descriptor
        index: usize,
        /// Description of the problem
        message: String,
    },

    /// A source reference has no recorded channel count yet.
    #[error("Topology entry {index}: source {source_ref} has no recorded channel count")]
    ForwardReference {
        /// Entry index in the descriptor
        index: usize,
        /// The unresolved source reference as written
        source_ref: i64,
    },

    /// Width policy has no mask for a declared normalization layer.
    #[error("No channel mask for normalization layer '{layer}'")]
    MissingMask {
        /// Normalization layer identity
        layer: String,
    },

    /// A declared tensor is absent from a checkpoint.
    #[error("Tensor '{tensor}' not found in checkpoint")]
    MissingTensor {
        /// Tensor name
        tensor: String,
    },

    /// The checkpoint holds tensors the topology does not declare.
    #[error("Checkpoint holds {} tensor(s) not declared by the topology, e.g. '{}'", .tensors.len(), .tensors.first().map_or("", String::as_str))]
    UnexpectedTensors {
        /// Undeclared tensor names
        tensors: Vec<String>,
    },

    /// Tensor shape does not match its declaration.
    #[error("Shape mismatch for '{tensor}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Tensor name
        tensor: String,
        /// Declared shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Slicing index or dimension out of range.
    #[error("Invalid index: {message}")]
    InvalidIndex {
        /// Description of the problem
        message: String,
    },

    /// A layer that reads upstream channels has no provenance entry.
    #[error("No provenance entry for layer '{layer}'")]
    MissingProvenance {
        /// Layer identity
        layer: String,
    },

    /// Transplant finished without populating every declared tensor.
    #[error("Incomplete transplant: {} tensor(s) never written, e.g. '{}'", .missing.len(), .missing.first().map_or("", String::as_str))]
    Incomplete {
        /// Declared but unwritten tensor names
        missing: Vec<String>,
    },

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SafeTensors or descriptor (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration file or value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PruneError {
    /// Get exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::FileNotFound(_) => ExitCode::from(3),
            Self::Serialization(_) => ExitCode::from(4),
            Self::InvalidRatio { .. }
            | Self::EmptyPool
            | Self::ZeroChannels { .. }
            | Self::Config(_) => ExitCode::from(5),
            Self::UnknownKind { .. }
            | Self::InvalidEntry { .. }
            | Self::ForwardReference { .. }
            | Self::MissingMask { .. } => ExitCode::from(6),
            Self::Io(_) => ExitCode::from(7),
            Self::Incomplete { .. } | Self::MissingProvenance { .. } => ExitCode::from(8),
            Self::NumericalInstability { .. }
            | Self::MissingTensor { .. }
            | Self::UnexpectedTensors { .. }
            | Self::ShapeMismatch { .. }
            | Self::InvalidIndex { .. } => ExitCode::from(1),
        }
    }
}

impl From<serde_json::Error> for PruneError {
    fn from(err: serde_json::Error) -> Self {
        PruneError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PruneError {
    fn from(err: toml::de::Error) -> Self {
        PruneError::Config(err.to_string())
    }
}
