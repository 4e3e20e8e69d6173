//! Channel keep-masks for normalization layers.
//!
//! A [`ChannelMask`] holds one retain/drop decision per output channel of a
//! normalization layer. The [`MaskDictionary`] maps every normalization
//! layer identity of a network to its mask and is read-only once the
//! scorer has produced it.

use std::collections::btree_map;
use std::collections::BTreeMap;

/// Boolean keep-mask over the output channels of one normalization layer.
///
/// `true` = channel retained. The length is the layer's original width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMask {
    keep: Vec<bool>,
}

impl ChannelMask {
    /// Create a mask from explicit decisions.
    #[must_use]
    pub fn new(keep: Vec<bool>) -> Self {
        Self { keep }
    }

    /// A mask retaining all `len` channels.
    #[must_use]
    pub fn all(len: usize) -> Self {
        Self {
            keep: vec![true; len],
        }
    }

    /// A mask of width `len` retaining exactly `indices`.
    ///
    /// Indices `>= len` are ignored.
    #[must_use]
    pub fn from_indices(len: usize, indices: &[usize]) -> Self {
        let mut keep = vec![false; len];
        for &i in indices {
            if let Some(slot) = keep.get_mut(i) {
                *slot = true;
            }
        }
        Self { keep }
    }

    /// Original channel count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keep.len()
    }

    /// True for a zero-width layer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    /// Number of retained channels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    /// True if every channel is retained.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.keep.iter().all(|&k| k)
    }

    /// Whether channel `index` is retained (false when out of range).
    #[must_use]
    pub fn is_kept(&self, index: usize) -> bool {
        self.keep.get(index).copied().unwrap_or(false)
    }

    /// Retained channel indices in ascending order.
    #[must_use]
    pub fn retained_indices(&self) -> Vec<usize> {
        self.keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect()
    }

    /// Mark channel `index` as retained.
    pub fn keep(&mut self, index: usize) {
        if let Some(slot) = self.keep.get_mut(index) {
            *slot = true;
        }
    }

    /// Decisions as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.keep
    }
}

/// Normalization layer identity → channel mask.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskDictionary {
    masks: BTreeMap<String, ChannelMask>,
}

impl MaskDictionary {
    /// Create an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a mask.
    pub fn insert(&mut self, layer: impl Into<String>, mask: ChannelMask) {
        self.masks.insert(layer.into(), mask);
    }

    /// Mask for a normalization layer.
    #[must_use]
    pub fn get(&self, layer: &str) -> Option<&ChannelMask> {
        self.masks.get(layer)
    }

    /// True if a mask exists for `layer`.
    #[must_use]
    pub fn contains(&self, layer: &str) -> bool {
        self.masks.contains_key(layer)
    }

    /// Number of masks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    /// True if the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Iterate `(layer, mask)` in layer-name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, ChannelMask> {
        self.masks.iter()
    }

    /// Total retained channels over all layers.
    #[must_use]
    pub fn total_retained(&self) -> usize {
        self.masks.values().map(ChannelMask::count).sum()
    }

    /// Total original channels over all layers.
    #[must_use]
    pub fn total_channels(&self) -> usize {
        self.masks.values().map(ChannelMask::len).sum()
    }
}

impl FromIterator<(String, ChannelMask)> for MaskDictionary {
    fn from_iter<I: IntoIterator<Item = (String, ChannelMask)>>(iter: I) -> Self {
        Self {
            masks: iter.into_iter().collect(),
        }
    }
}
