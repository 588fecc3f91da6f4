//! Position-wise feed-forward network: up projection, GELU, down projection.

use crate::api::error::{NnError, NnResult};
use crate::api::types::Workspace;
use crate::core::linear::Linear;
use ember_core::{gelu_in_place, MatMut, MatRef};
use rand::Rng;

pub struct FeedForward {
    pub up_proj: Linear,
    pub down_proj: Linear,
}

impl FeedForward {
    pub fn new(d_model: usize, hidden_dim: usize, rng: &mut impl Rng) -> Self {
        Self {
            up_proj: Linear::new(d_model, hidden_dim, true, rng),
            down_proj: Linear::new(hidden_dim, d_model, true, rng),
        }
    }

    pub fn from_weights(up_proj: Linear, down_proj: Linear) -> NnResult<Self> {
        if up_proj.out_features() != down_proj.in_features()
            || up_proj.in_features() != down_proj.out_features()
        {
            return Err(NnError::ShapeMismatch(format!(
                "FeedForward up {}->{} does not chain with down {}->{}",
                up_proj.in_features(),
                up_proj.out_features(),
                down_proj.in_features(),
                down_proj.out_features()
            )));
        }
        Ok(Self { up_proj, down_proj })
    }

    pub fn hidden_dim(&self) -> usize {
        self.up_proj.out_features()
    }

    pub fn linears_mut(&mut self) -> [&mut Linear; 2] {
        [&mut self.up_proj, &mut self.down_proj]
    }

    pub fn forward_into(&self, ws: &Workspace<'_>, x: MatRef<'_>, out: MatMut<'_>) -> NnResult<()> {
        let mut hidden = ws.pool.scoped(&[x.rows(), self.hidden_dim()]);
        self.up_proj.forward_into(ws.gemm, x, hidden.mat_mut()?)?;
        gelu_in_place(hidden.as_mut_slice());
        self.down_proj.forward_into(ws.gemm, hidden.mat()?, out)
    }
}
