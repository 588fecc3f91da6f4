use crate::api::error::{NnError, NnResult};
use ember_core::{layer_norm_row, MatMut, MatRef, Tensor};

/// Layer normalization over the last dimension.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub weight: Tensor,
    pub bias: Tensor,
    pub eps: f32,
}

impl LayerNorm {
    /// Unit scale, zero shift.
    pub fn new(dim: usize, eps: f32) -> Self {
        Self {
            weight: Tensor::full([dim], 1.0),
            bias: Tensor::zeros([dim]),
            eps,
        }
    }

    pub fn from_weights(weight: Tensor, bias: Tensor, eps: f32) -> NnResult<Self> {
        if weight.ndim() != 1 || weight.shape() != bias.shape() {
            return Err(NnError::ShapeMismatch(format!(
                "LayerNorm weight {:?} and bias {:?} must be matching vectors",
                weight.shape(),
                bias.shape()
            )));
        }
        Ok(Self { weight, bias, eps })
    }

    pub fn dim(&self) -> usize {
        self.weight.numel()
    }

    /// Normalize every row of `x` into the same row of `out`.
    pub fn forward_into(&self, x: MatRef<'_>, mut out: MatMut<'_>) -> NnResult<()> {
        let dim = self.dim();
        if x.cols() != dim || out.cols() != dim || out.rows() != x.rows() {
            return Err(NnError::ShapeMismatch(format!(
                "LayerNorm of width {} got input {}x{} and output {}x{}",
                dim,
                x.rows(),
                x.cols(),
                out.rows(),
                out.cols()
            )));
        }
        let (gamma, beta) = (self.weight.as_slice(), self.bias.as_slice());
        for i in 0..x.rows() {
            layer_norm_row(x.row(i), gamma, beta, self.eps, out.row_mut(i));
        }
        Ok(())
    }
}
