//! Dense `f32` tensor used for checkpoint surgery.
//!
//! Row-major storage with an explicit shape. There is no gradient
//! tracking here: pruning only reads trained weights, slices them along
//! channel dimensions and writes the result into a smaller network.

use std::fmt;

use crate::error::{PruneError, Result};

/// Element type a tensor was stored with.
///
/// Values are always held as `f32`; integer tensors remember their width
/// so they are written back as integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ElementKind {
    /// Floating point (the default).
    #[default]
    Float,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
}

impl ElementKind {
    /// True for integer kinds.
    #[must_use]
    pub fn is_integral(self) -> bool {
        !matches!(self, Self::Float)
    }
}

/// A dense tensor with row-major `f32` data.
///
/// A scalar has an empty shape and one element, matching how batch-norm
/// counters such as `num_batches_tracked` are stored in checkpoints.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
    kind: ElementKind,
}

impl Tensor {
    /// Create a tensor from owned data and a shape.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::ShapeMismatch`] if the data length does not
    /// match the product of the shape dimensions.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(PruneError::ShapeMismatch {
                tensor: "<anonymous>".to_string(),
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
            kind: ElementKind::Float,
        })
    }

    /// Create a tensor from a 1D slice (vector).
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self {
            data: data.to_vec(),
            shape: vec![data.len()],
            kind: ElementKind::Float,
        }
    }

    /// Create a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self {
            data: vec![0.0; len],
            shape: shape.to_vec(),
            kind: ElementKind::Float,
        }
    }

    /// Create a single-element scalar tensor with an empty shape.
    #[must_use]
    pub fn scalar(value: f32) -> Self {
        Self {
            data: vec![value],
            shape: Vec::new(),
            kind: ElementKind::Float,
        }
    }

    /// Tag the tensor with the element kind it is stored as.
    #[must_use]
    pub fn with_kind(mut self, kind: ElementKind) -> Self {
        self.kind = kind;
        self
    }

    /// Element kind.
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Get the shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Raw data in row-major order.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable raw data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume the tensor, returning `(data, shape)`.
    #[must_use]
    pub fn into_parts(self) -> (Vec<f32>, Vec<usize>) {
        (self.data, self.shape)
    }

    /// True if every element is exactly zero.
    #[must_use]
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Select entries along `dim`, keeping the order given by `indices`.
    ///
    /// The result has the same rank; `shape[dim]` becomes `indices.len()`.
    /// Selecting a single index keeps the dimension (no squeeze).
    ///
    /// # Errors
    ///
    /// Returns an error if `dim` is out of range for this tensor or any
    /// index is `>= shape[dim]`.
    pub fn index_select(&self, dim: usize, indices: &[usize]) -> Result<Tensor> {
        if dim >= self.ndim() {
            return Err(PruneError::InvalidIndex {
                message: format!("dim {dim} out of range for shape {:?}", self.shape),
            });
        }
        let extent = self.shape[dim];
        if let Some(&bad) = indices.iter().find(|&&i| i >= extent) {
            return Err(PruneError::InvalidIndex {
                message: format!("index {bad} out of range for dim {dim} of size {extent}"),
            });
        }

        let outer: usize = self.shape[..dim].iter().product();
        let inner: usize = self.shape[dim + 1..].iter().product();

        let mut data = Vec::with_capacity(outer * indices.len() * inner);
        for o in 0..outer {
            let base = o * extent * inner;
            for &i in indices {
                let start = base + i * inner;
                data.extend_from_slice(&self.data[start..start + inner]);
            }
        }

        let mut shape = self.shape.clone();
        shape[dim] = indices.len();
        Ok(Tensor {
            data,
            shape,
            kind: self.kind,
        })
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("kind", &self.kind)
            .field("numel", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arange(shape: &[usize]) -> Tensor {
        let n: usize = shape.iter().product();
        Tensor::from_vec((0..n).map(|v| v as f32).collect(), shape).unwrap()
    }

    #[test]
    fn test_from_vec_rejects_bad_length() {
        assert!(Tensor::from_vec(vec![1.0, 2.0, 3.0], &[2, 2]).is_err());
    }

    #[test]
    fn test_scalar_has_empty_shape() {
        let t = Tensor::scalar(7.0);
        assert_eq!(t.ndim(), 0);
        assert_eq!(t.numel(), 1);
        assert_eq!(t.data(), &[7.0]);
    }

    #[test]
    fn test_index_select_dim0() {
        let t = arange(&[4, 2]);
        let s = t.index_select(0, &[3, 1]).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.data(), &[6.0, 7.0, 2.0, 3.0]);
    }

    #[test]
    fn test_index_select_inner_dim_keeps_order() {
        // [out=2, in=3, 1, 1]
        let t = arange(&[2, 3, 1, 1]);
        let s = t.index_select(1, &[0, 2]).unwrap();
        assert_eq!(s.shape(), &[2, 2, 1, 1]);
        assert_eq!(s.data(), &[0.0, 2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_index_select_single_channel_keeps_rank() {
        let t = arange(&[3, 4, 3, 3]);
        let s = t.index_select(1, &[2]).unwrap();
        assert_eq!(s.shape(), &[3, 1, 3, 3]);
        assert_eq!(s.ndim(), 4);
    }

    #[test]
    fn test_index_select_out_of_range() {
        let t = arange(&[2, 2]);
        assert!(t.index_select(1, &[2]).is_err());
        assert!(t.index_select(2, &[0]).is_err());
    }

    #[test]
    fn test_is_all_zero() {
        assert!(Tensor::zeros(&[3, 3]).is_all_zero());
        assert!(!Tensor::from_slice(&[0.0, 1e-9]).is_all_zero());
    }

    #[test]
    fn test_index_select_keeps_element_kind() {
        let t = Tensor::from_slice(&[3.0, 7.0, 9.0]).with_kind(ElementKind::Int64);
        let s = t.index_select(0, &[0, 2]).unwrap();
        assert_eq!(s.kind(), ElementKind::Int64);
        assert!(s.kind().is_integral());
        assert!(!Tensor::scalar(1.0).kind().is_integral());
    }
}
