//! Linear layer implementation with quantized weight support.

use crate::api::error::{NnError, NnResult};
use ember_core::{add_in_place, GemmDispatcher, MatMut, MatRef, Tensor};
use ember_quant::{QuantFormat, QuantizedGemm, QuantizedMatrix, QK};
use rand::Rng;

/// Weight storage of a [`Linear`] layer, always `[out_features, in_features]`.
#[derive(Debug, Clone)]
pub enum Weight {
    Dense(Tensor),
    Quantized(QuantizedMatrix),
}

/// A fully connected linear layer: y = xW^T + b
///
/// Quantized weights stay quantized; their blocks are decoded inside the
/// GEMM as they are consumed.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Weight,
    bias: Option<Tensor>,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Xavier/Glorot-initialized layer with an optional zero bias.
    pub fn new(in_features: usize, out_features: usize, bias: bool, rng: &mut impl Rng) -> Self {
        let std = (2.0 / (in_features + out_features) as f32).sqrt();
        let weight = Tensor::randn_scaled([out_features, in_features], std, rng);
        Self {
            weight: Weight::Dense(weight),
            bias: bias.then(|| Tensor::zeros([out_features])),
            in_features,
            out_features,
        }
    }

    /// Create a linear layer from existing `[out_features, in_features]` weights.
    pub fn from_weights(weight: Tensor, bias: Option<Tensor>) -> NnResult<Self> {
        let (out_features, in_features) = match weight.shape() {
            [out, inp] => (*out, *inp),
            other => {
                return Err(NnError::ShapeMismatch(format!(
                    "Linear weight must be 2D, got {:?}",
                    other
                )))
            }
        };
        Self::assemble(Weight::Dense(weight), bias, in_features, out_features)
    }

    /// Create a linear layer over pre-quantized weights.
    pub fn from_quantized(weight: QuantizedMatrix, bias: Option<Tensor>) -> NnResult<Self> {
        let (out_features, in_features) = (weight.rows(), weight.cols());
        Self::assemble(Weight::Quantized(weight), bias, in_features, out_features)
    }

    fn assemble(weight: Weight, bias: Option<Tensor>, in_features: usize, out_features: usize) -> NnResult<Self> {
        if let Some(ref b) = bias {
            if b.shape() != [out_features] {
                return Err(NnError::ShapeMismatch(format!(
                    "Bias shape {:?} doesn't match out_features {}",
                    b.shape(),
                    out_features
                )));
            }
        }
        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Weight {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self.weight, Weight::Quantized(_))
    }

    /// Convert dense weights to `format`. Returns false when the layer is
    /// already quantized or its input width is not block-aligned.
    pub fn quantize(&mut self, format: QuantFormat) -> NnResult<bool> {
        let dense = match &self.weight {
            Weight::Dense(w) => w,
            Weight::Quantized(_) => return Ok(false),
        };
        if self.in_features % QK != 0 {
            log::debug!(
                "[linear] keeping {}x{} dense: input width not a multiple of {}",
                self.out_features,
                self.in_features,
                QK
            );
            return Ok(false);
        }
        self.weight = Weight::Quantized(QuantizedMatrix::from_tensor(format, dense)?);
        Ok(true)
    }

    pub fn parameter_count(&self) -> usize {
        let bias = self.bias.as_ref().map_or(0, Tensor::numel);
        self.in_features * self.out_features + bias
    }

    /// Weight storage in bytes.
    pub fn weight_bytes(&self) -> usize {
        match &self.weight {
            Weight::Dense(w) => w.numel() * std::mem::size_of::<f32>(),
            Weight::Quantized(q) => q.byte_size(),
        }
    }

    /// out = x·Wᵀ + b, with x `[rows, in_features]` and out `[rows, out_features]`.
    pub fn forward_into(&self, gemm: &GemmDispatcher, x: MatRef<'_>, mut out: MatMut<'_>) -> NnResult<()> {
        match &self.weight {
            Weight::Dense(w) => gemm.matmul_transposed(x, w.mat()?, out.reborrow())?,
            Weight::Quantized(q) => gemm.matmul_quantized(x, q, out.reborrow())?,
        }
        if let Some(ref b) = self.bias {
            for i in 0..out.rows() {
                add_in_place(out.row_mut(i), b.as_slice());
            }
        }
        Ok(())
    }

    /// Allocating convenience wrapper over [`forward_into`](Self::forward_into).
    ///
    /// Input shape: [..., in_features]; output shape: [..., out_features].
    pub fn forward(&self, gemm: &GemmDispatcher, x: &Tensor) -> NnResult<Tensor> {
        let mut out_shape = x.shape().to_vec();
        match out_shape.last_mut() {
            Some(last) if *last == self.in_features => *last = self.out_features,
            _ => {
                return Err(NnError::ShapeMismatch(format!(
                    "Linear expects [..., {}], got {:?}",
                    self.in_features,
                    x.shape()
                )))
            }
        }
        let mut out = Tensor::zeros(&out_shape);
        self.forward_into(gemm, x.mat()?, out.mat_mut()?)?;
        Ok(out)
    }
}
