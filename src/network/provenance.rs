//! Provenance: which normalization layer(s) feed a layer's input channels.
//!
//! # Problem
//! When output channel j of normalization layer L is dropped, every
//! convolution reading L must drop input channel j as well. Through a
//! concatenation the consumer's input axis is the sources' channels laid
//! end to end, so source k's local index i becomes
//! `i + sum(original_width(0..k))`.

use crate::error::{PruneError, Result};
use crate::pruning::{ChannelMask, MaskDictionary};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Upstream normalization layer(s) determining a layer's input channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// One upstream normalization layer.
    Single(String),
    /// Ordered concatenation of upstream normalization layers.
    Concat(Vec<String>),
    /// One source broadcast into `copies` consecutive concatenation slots.
    Repeated {
        /// Upstream normalization layer
        source: String,
        /// Number of slots
        copies: usize,
    },
}

impl Provenance {
    /// Sources in input-axis order, with repeated slots expanded.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        match self {
            Provenance::Single(s) => vec![s.as_str()],
            Provenance::Concat(list) => list.iter().map(String::as_str).collect(),
            Provenance::Repeated { source, copies } => vec![source.as_str(); *copies],
        }
    }

    /// Retained input indices into the original (unpruned) input axis.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::MissingMask`] if a source has no mask.
    pub fn input_indices(&self, masks: &MaskDictionary) -> Result<Vec<usize>> {
        let parts = self.source_masks(masks)?;
        Ok(concat_input_indices(&parts))
    }

    /// Number of retained input channels.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::MissingMask`] if a source has no mask.
    pub fn retained_width(&self, masks: &MaskDictionary) -> Result<usize> {
        Ok(self
            .source_masks(masks)?
            .iter()
            .map(|m| m.count())
            .sum())
    }

    fn source_masks<'a>(&self, masks: &'a MaskDictionary) -> Result<Vec<&'a ChannelMask>> {
        self.sources()
            .into_iter()
            .map(|s| {
                masks.get(s).ok_or_else(|| PruneError::MissingMask {
                    layer: s.to_string(),
                })
            })
            .collect()
    }
}

/// Flatten concatenated masks into retained indices of the joint axis.
///
/// Each part's local retained indices are offset by the summed original
/// widths of the parts before it; order is preserved.
#[must_use]
pub fn concat_input_indices(parts: &[&ChannelMask]) -> Vec<usize> {
    let mut indices = Vec::with_capacity(parts.iter().map(|m| m.count()).sum());
    let mut offset = 0;
    for mask in parts {
        indices.extend(mask.retained_indices().into_iter().map(|i| i + offset));
        offset += mask.len();
    }
    indices
}

/// Layer identity → provenance entry.
///
/// Keys are normalization identities for conv blocks and convolution
/// identities for head output convolutions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceMap {
    entries: BTreeMap<String, Provenance>,
}

impl ProvenanceMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the provenance of `layer`.
    pub fn insert(&mut self, layer: impl Into<String>, provenance: Provenance) {
        self.entries.insert(layer.into(), provenance);
    }

    /// Provenance of `layer`, if it reads from a normalization layer.
    #[must_use]
    pub fn get(&self, layer: &str) -> Option<&Provenance> {
        self.entries.get(layer)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in layer-name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Provenance> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_offsets_use_original_width() {
        let a = ChannelMask::from_indices(128, &[0, 5, 9]);
        let b = ChannelMask::from_indices(64, &[2, 3]);
        assert_eq!(concat_input_indices(&[&a, &b]), vec![0, 5, 9, 130, 131]);
    }

    #[test]
    fn test_single_source_is_plain_retained_set() {
        let mut masks = MaskDictionary::new();
        masks.insert("model.1.bn", ChannelMask::new(vec![false, true, true, false]));
        let p = Provenance::Single("model.1.bn".to_string());
        assert_eq!(p.input_indices(&masks).unwrap(), vec![1, 2]);
        assert_eq!(p.retained_width(&masks).unwrap(), 2);
    }

    #[test]
    fn test_repeated_source_offsets_each_copy() {
        let mut masks = MaskDictionary::new();
        masks.insert("model.9.cv1.bn", ChannelMask::new(vec![true, false, true]));
        let p = Provenance::Repeated {
            source: "model.9.cv1.bn".to_string(),
            copies: 4,
        };
        assert_eq!(p.sources().len(), 4);
        assert_eq!(
            p.input_indices(&masks).unwrap(),
            vec![0, 2, 3, 5, 6, 8, 9, 11]
        );
        assert_eq!(p.retained_width(&masks).unwrap(), 8);
    }

    #[test]
    fn test_concat_order_matters() {
        let mut masks = MaskDictionary::new();
        masks.insert("a", ChannelMask::from_indices(4, &[3]));
        masks.insert("b", ChannelMask::from_indices(2, &[0]));
        let ab = Provenance::Concat(vec!["a".to_string(), "b".to_string()]);
        let ba = Provenance::Concat(vec!["b".to_string(), "a".to_string()]);
        assert_eq!(ab.input_indices(&masks).unwrap(), vec![3, 4]);
        assert_eq!(ba.input_indices(&masks).unwrap(), vec![0, 5]);
    }

    #[test]
    fn test_missing_source_mask() {
        let masks = MaskDictionary::new();
        let p = Provenance::Single("model.3.bn".to_string());
        let err = p.input_indices(&masks).unwrap_err();
        assert!(matches!(err, PruneError::MissingMask { .. }));
    }

    #[test]
    fn test_map_insert_and_get() {
        let mut map = ProvenanceMap::new();
        map.insert("model.1.bn", Provenance::Single("model.0.bn".to_string()));
        assert_eq!(map.len(), 1);
        assert!(map.get("model.0.bn").is_none());
        assert_eq!(
            map.get("model.1.bn"),
            Some(&Provenance::Single("model.0.bn".to_string()))
        );
    }
}
