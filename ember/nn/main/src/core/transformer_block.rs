//! Transformer block: pre-norm self-attention + FFN with residual connections.

use crate::api::error::{NnError, NnResult};
use crate::api::types::Workspace;
use crate::core::attention::MultiHeadAttention;
use crate::core::config::ModelConfig;
use crate::core::feed_forward::FeedForward;
use crate::core::kv_cache::KvCache;
use crate::core::layer_norm::LayerNorm;
use crate::core::linear::Linear;
use ember_core::{add_in_place, Tensor};
use rand::Rng;

/// A single transformer block with pre-norm architecture.
///
/// Structure: x -> norm1 -> self_attn -> + -> norm2 -> ffn -> +
pub struct TransformerBlock {
    pub attention: MultiHeadAttention,
    pub feed_forward: FeedForward,
    pub attention_norm: LayerNorm,
    pub ffn_norm: LayerNorm,
}

impl TransformerBlock {
    pub fn new(config: &ModelConfig, rng: &mut impl Rng) -> NnResult<Self> {
        Ok(Self {
            attention: MultiHeadAttention::new(config.d_model, config.n_heads, rng)?,
            feed_forward: FeedForward::new(config.d_model, config.hidden_dim, rng),
            attention_norm: LayerNorm::new(config.d_model, config.norm_eps),
            ffn_norm: LayerNorm::new(config.d_model, config.norm_eps),
        })
    }

    /// Construct from pre-loaded components.
    pub fn from_weights(
        attention: MultiHeadAttention,
        feed_forward: FeedForward,
        attention_norm: LayerNorm,
        ffn_norm: LayerNorm,
    ) -> Self {
        Self {
            attention,
            feed_forward,
            attention_norm,
            ffn_norm,
        }
    }

    /// Check every component against the model geometry.
    pub fn validate(&self, config: &ModelConfig) -> NnResult<()> {
        let d = config.d_model;
        let ok = self.attention.d_model() == d
            && self.attention.n_heads() == config.n_heads
            && self.attention_norm.dim() == d
            && self.ffn_norm.dim() == d
            && self.feed_forward.up_proj.in_features() == d
            && self.feed_forward.hidden_dim() == config.hidden_dim;
        if !ok {
            return Err(NnError::ShapeMismatch(format!(
                "block (d_model {}, {} heads, hidden {}) does not match config (d_model {}, {} heads, hidden {})",
                self.attention.d_model(),
                self.attention.n_heads(),
                self.feed_forward.hidden_dim(),
                d,
                config.n_heads,
                config.hidden_dim
            )));
        }
        Ok(())
    }

    pub fn linears_mut(&mut self) -> impl Iterator<Item = &mut Linear> {
        self.attention
            .linears_mut()
            .into_iter()
            .chain(self.feed_forward.linears_mut())
    }

    /// Update `x` (`[t, d_model]`) in place for positions `start_pos..start_pos + t`.
    pub fn forward(
        &self,
        ws: &Workspace<'_>,
        x: &mut Tensor,
        cache: &mut KvCache,
        layer: usize,
        start_pos: usize,
    ) -> NnResult<()> {
        let shape = match x.shape() {
            [t, d] => [*t, *d],
            other => {
                return Err(NnError::ShapeMismatch(format!(
                    "block input must be [t, d_model], got {:?}",
                    other
                )))
            }
        };
        let mut normed = ws.pool.scoped(&shape);
        let mut delta = ws.pool.scoped(&shape);

        self.attention_norm.forward_into(x.mat()?, normed.mat_mut()?)?;
        self.attention
            .forward_into(ws, normed.mat()?, cache, layer, start_pos, delta.mat_mut()?)?;
        add_in_place(x.as_mut_slice(), delta.as_slice());

        self.ffn_norm.forward_into(x.mat()?, normed.mat_mut()?)?;
        self.feed_forward.forward_into(ws, normed.mat()?, delta.mat_mut()?)?;
        add_in_place(x.as_mut_slice(), delta.as_slice());
        Ok(())
    }
}
