//! Named-tensor checkpoints.
//!
//! A [`Checkpoint`] maps tensor names such as `model.2.m.0.cv1.conv.weight`
//! to tensors. Names are kept sorted so that iteration, serialization and
//! error reports are deterministic.

use crate::error::{PruneError, Result};
use crate::network::Network;
use crate::tensor::Tensor;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Mapping from tensor name to tensor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    tensors: BTreeMap<String, Tensor>,
}

impl Checkpoint {
    /// Create an empty checkpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A checkpoint holding a zero tensor for every tensor `network`
    /// declares.
    #[must_use]
    pub fn zeros_for(network: &Network) -> Self {
        network
            .declared_tensors()
            .into_iter()
            .map(|(name, shape)| (name, Tensor::zeros(&shape)))
            .collect()
    }

    /// Insert or replace a tensor, returning the previous one.
    pub fn insert(&mut self, name: String, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name, tensor)
    }

    /// Replace an existing tensor, checking that the shape is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::MissingTensor`] if `name` is absent and
    /// [`PruneError::ShapeMismatch`] if the shapes differ.
    pub fn overwrite(&mut self, name: &str, tensor: Tensor) -> Result<()> {
        let slot = self
            .tensors
            .get_mut(name)
            .ok_or_else(|| PruneError::MissingTensor {
                tensor: name.to_string(),
            })?;
        if slot.shape() != tensor.shape() {
            return Err(PruneError::ShapeMismatch {
                tensor: name.to_string(),
                expected: slot.shape().to_vec(),
                got: tensor.shape().to_vec(),
            });
        }
        *slot = tensor;
        Ok(())
    }

    /// Tensor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Mutable tensor by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.tensors.get_mut(name)
    }

    /// Tensor by name, or [`PruneError::MissingTensor`].
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor is absent.
    pub fn require(&self, name: &str) -> Result<&Tensor> {
        self.tensors.get(name).ok_or_else(|| PruneError::MissingTensor {
            tensor: name.to_string(),
        })
    }

    /// True if `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Tensor names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Iterate `(name, tensor)` in sorted order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Tensor> {
        self.tensors.iter()
    }

    /// Number of tensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// True if there are no tensors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar values.
    #[must_use]
    pub fn num_values(&self) -> usize {
        self.tensors.values().map(Tensor::numel).sum()
    }
}

impl FromIterator<(String, Tensor)> for Checkpoint {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Checkpoint {
    type Item = (&'a String, &'a Tensor);
    type IntoIter = btree_map::Iter<'a, String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_names_missing_tensor() {
        let ckpt = Checkpoint::new();
        let err = ckpt.require("model.0.bn.weight").unwrap_err();
        assert!(err.to_string().contains("model.0.bn.weight"));
    }

    #[test]
    fn test_overwrite_checks_shape() {
        let mut ckpt = Checkpoint::new();
        ckpt.insert("w".to_string(), Tensor::zeros(&[2, 3]));

        ckpt.overwrite("w", Tensor::from_vec(vec![1.0; 6], &[2, 3]).unwrap())
            .unwrap();
        assert_eq!(ckpt.get("w").unwrap().data()[0], 1.0);

        let err = ckpt.overwrite("w", Tensor::zeros(&[3, 2])).unwrap_err();
        assert!(matches!(err, PruneError::ShapeMismatch { .. }));

        let err = ckpt.overwrite("b", Tensor::zeros(&[2])).unwrap_err();
        assert!(matches!(err, PruneError::MissingTensor { .. }));
    }

    #[test]
    fn test_names_are_sorted() {
        let ckpt: Checkpoint = [
            ("model.2.bn.bias".to_string(), Tensor::zeros(&[1])),
            ("model.10.bn.bias".to_string(), Tensor::zeros(&[1])),
            ("model.0.bn.bias".to_string(), Tensor::zeros(&[4])),
        ]
        .into_iter()
        .collect();
        let names: Vec<&str> = ckpt.names().collect();
        assert_eq!(
            names,
            vec!["model.0.bn.bias", "model.10.bn.bias", "model.2.bn.bias"]
        );
        assert_eq!(ckpt.num_values(), 6);
    }
}
