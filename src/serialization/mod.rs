//! Checkpoint serialization.
//!
//! ## `SafeTensors` Format
//! Industry-standard format compatible with the `HuggingFace` ecosystem and
//! `PyTorch` exporters.
//! ```text
//! [8-byte header: u64 metadata length (little-endian)]
//! [JSON metadata: tensor names, dtypes, shapes, data_offsets]
//! [Raw tensor data]
//! ```
//!
//! Example:
//! ```rust
//! use aprender_prune::serialization::safetensors::{
//!     checkpoint_from_bytes, checkpoint_to_bytes, SafeTensorsDType, UserMetadata,
//! };
//! use aprender_prune::{Checkpoint, Tensor};
//!
//! let mut ckpt = Checkpoint::new();
//! ckpt.insert("model.0.bn.weight".to_string(), Tensor::from_slice(&[1.0, 0.5]));
//!
//! let bytes = checkpoint_to_bytes(&ckpt, SafeTensorsDType::F32, &UserMetadata::new()).unwrap();
//! let (loaded, _) = checkpoint_from_bytes(&bytes).unwrap();
//! assert_eq!(loaded, ckpt);
//! ```

pub mod safetensors;

pub use safetensors::{load_checkpoint, save_checkpoint, SafeTensorsDType, UserMetadata};
