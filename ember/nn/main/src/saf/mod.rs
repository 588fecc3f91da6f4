//! Facade re-exports for ember-nn

pub use crate::api::error::*;
pub use crate::api::types::*;
pub use crate::core::attention::{causal_softmax, MultiHeadAttention};
pub use crate::core::config::ModelConfig;
pub use crate::core::feed_forward::FeedForward;
pub use crate::core::kv_cache::KvCache;
pub use crate::core::layer_norm::LayerNorm;
pub use crate::core::linear::{Linear, Weight};
pub use crate::core::model::TransformerModel;
pub use crate::core::session::KvCacheStore;
pub use crate::core::transformer_block::TransformerBlock;
