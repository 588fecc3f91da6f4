use crate::api::error::{NnError, NnResult};
use crate::api::types::CacheShape;
use serde::{Deserialize, Serialize};

fn default_norm_eps() -> f32 {
    1e-5
}

/// Model geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub d_model: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    /// Width of the feed-forward hidden layer.
    pub hidden_dim: usize,
    /// Longest sequence a session can hold; sizes the position table and KV cache.
    pub max_seq_len: usize,
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f32,
}

impl ModelConfig {
    pub fn from_json_str(json: &str) -> NnResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| NnError::InvalidConfig(format!("model config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NnResult<()> {
        let dims = [
            ("vocab_size", self.vocab_size),
            ("d_model", self.d_model),
            ("n_layers", self.n_layers),
            ("n_heads", self.n_heads),
            ("hidden_dim", self.hidden_dim),
            ("max_seq_len", self.max_seq_len),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(NnError::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        if self.d_model % self.n_heads != 0 {
            return Err(NnError::InvalidConfig(format!(
                "d_model {} not divisible by n_heads {}",
                self.d_model, self.n_heads
            )));
        }
        if self.norm_eps.is_nan() || self.norm_eps <= 0.0 {
            return Err(NnError::InvalidConfig(format!(
                "norm_eps must be positive, got {}",
                self.norm_eps
            )));
        }
        Ok(())
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }

    pub fn cache_shape(&self) -> CacheShape {
        CacheShape {
            n_layers: self.n_layers,
            n_heads: self.n_heads,
            head_dim: self.head_dim(),
        }
    }
}
