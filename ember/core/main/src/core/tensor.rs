//! Contiguous f32 tensor with pool ownership tracking.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::TensorShape;
use crate::core::matrix::{MatMut, MatRef};
use rand::Rng;
use smallvec::SmallVec;
use std::fmt;

/// A row-major f32 array.
///
/// `pooled` records whether the buffer was rented from a [`TensorPool`](crate::TensorPool)
/// and should go back to it once the owner is done.
#[derive(Clone)]
pub struct Tensor {
    pub(crate) data: Vec<f32>,
    pub(crate) shape: TensorShape,
    pub(crate) pooled: bool,
}

fn numel_of(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl Tensor {
    // ==================== Constructors ====================

    /// Create a tensor from an f32 vector with the given shape.
    pub fn from_vec(data: Vec<f32>, shape: impl AsRef<[usize]>) -> TensorResult<Self> {
        let shape = shape.as_ref();
        if data.len() != numel_of(shape) {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            shape: SmallVec::from_slice(shape),
            pooled: false,
        })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl AsRef<[usize]>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with a specific value.
    pub fn full(shape: impl AsRef<[usize]>, value: f32) -> Self {
        let shape = shape.as_ref();
        Self {
            data: vec![value; numel_of(shape)],
            shape: SmallVec::from_slice(shape),
            pooled: false,
        }
    }

    /// Create a tensor with standard normal values drawn from `rng`.
    pub fn randn(shape: impl AsRef<[usize]>, rng: &mut impl Rng) -> Self {
        Self::randn_scaled(shape, 1.0, rng)
    }

    /// Normal values with standard deviation `std` (Box-Muller).
    pub fn randn_scaled(shape: impl AsRef<[usize]>, std: f32, rng: &mut impl Rng) -> Self {
        let shape = shape.as_ref();
        let data: Vec<f32> = (0..numel_of(shape))
            .map(|_| {
                let u1: f32 = rng.r#gen::<f32>().max(1e-7);
                let u2: f32 = rng.r#gen();
                std * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
            })
            .collect();
        Self {
            data,
            shape: SmallVec::from_slice(shape),
            pooled: false,
        }
    }

    /// Create an identity matrix.
    pub fn eye(n: usize) -> Self {
        let mut data = vec![0.0f32; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Self {
            data,
            shape: SmallVec::from_slice(&[n, n]),
            pooled: false,
        }
    }

    /// Wrap a pool buffer. Length must already match the shape.
    pub(crate) fn from_pooled(data: Vec<f32>, shape: &[usize]) -> Self {
        debug_assert_eq!(data.len(), numel_of(shape));
        Self {
            data,
            shape: SmallVec::from_slice(shape),
            pooled: true,
        }
    }

    // ==================== Accessors ====================

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer belongs to a pool.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Release the underlying buffer.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Get a single element by indices.
    pub fn get(&self, indices: &[usize]) -> TensorResult<f32> {
        if indices.len() != self.ndim() {
            return Err(TensorError::InvalidOperation(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }
        let mut offset = 0usize;
        for (dim, (&idx, &size)) in indices.iter().zip(self.shape.iter()).enumerate() {
            if idx >= size {
                return Err(TensorError::IndexOutOfBounds { dim, index: idx, size });
            }
            offset = offset * size + idx;
        }
        Ok(self.data[offset])
    }

    /// Row `i` of the tensor viewed as `[rows, last_dim]`.
    pub fn row(&self, i: usize) -> TensorResult<&[f32]> {
        let cols = self.last_dim();
        let rows = self.rows();
        if i >= rows {
            return Err(TensorError::IndexOutOfBounds { dim: 0, index: i, size: rows });
        }
        Ok(&self.data[i * cols..(i + 1) * cols])
    }

    // ==================== Reinterpretation ====================

    /// Reinterpret the buffer under a new shape with the same element count.
    pub fn reshape(mut self, shape: impl AsRef<[usize]>) -> TensorResult<Self> {
        let shape = shape.as_ref();
        if numel_of(shape) != self.data.len() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: self.shape.to_vec(),
            });
        }
        self.shape = SmallVec::from_slice(shape);
        Ok(self)
    }

    /// Matrix view treating all leading dimensions as rows.
    pub fn mat(&self) -> TensorResult<MatRef<'_>> {
        MatRef::new(&self.data, self.rows(), self.last_dim())
    }

    /// Mutable matrix view treating all leading dimensions as rows.
    pub fn mat_mut(&mut self) -> TensorResult<MatMut<'_>> {
        let (rows, cols) = (self.rows(), self.last_dim());
        MatMut::new(&mut self.data, rows, cols)
    }

    fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    fn rows(&self) -> usize {
        match self.last_dim() {
            0 => 0,
            cols => self.data.len() / cols,
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape.as_slice())
            .field("pooled", &self.pooled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_from_vec_shape_check() {
        let err = Tensor::from_vec(vec![1.0, 2.0, 3.0], [2, 2]).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_get_row_major() {
        let t = Tensor::from_vec((0..6).map(|x| x as f32).collect(), [2, 3]).unwrap();
        assert_eq!(t.get(&[1, 2]).unwrap(), 5.0);
        assert_eq!(t.row(1).unwrap(), &[3.0, 4.0, 5.0]);
        assert!(t.get(&[2, 0]).is_err());
    }

    #[test]
    fn test_reshape_requires_same_numel() {
        let t = Tensor::zeros([2, 6]);
        let t = t.reshape([3, 4]).unwrap();
        assert_eq!(t.shape(), &[3, 4]);
        assert!(t.reshape([5]).is_err());
    }

    #[test]
    fn test_mat_collapses_leading_dims() {
        let t = Tensor::zeros([2, 3, 4]);
        let m = t.mat().unwrap();
        assert_eq!((m.rows(), m.cols()), (6, 4));
    }

    #[test]
    fn test_randn_is_seeded() {
        let a = Tensor::randn([16], &mut StdRng::seed_from_u64(7));
        let b = Tensor::randn([16], &mut StdRng::seed_from_u64(7));
        assert_eq!(a.as_slice(), b.as_slice());
        assert!(!a.is_pooled());
    }
}
