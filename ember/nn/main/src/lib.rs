//! # Ember NN
//!
//! GPT-style decoder built on the Ember GEMM kernels.
//!
//! - `TransformerModel`: embeddings, pre-norm blocks, final norm and LM head
//! - `MultiHeadAttention`: attention as two GEMMs per head around a causal softmax
//! - `KvCache` / `KvCacheStore`: per-session key/value history with prefix
//!   reuse and LRU eviction under token and byte budgets
//!
//! ## Example
//!
//! ```rust
//! use ember_core::RuntimeConfig;
//! use ember_nn::{CacheBudget, KvCacheStore, ModelConfig, StepKind, TransformerModel};
//!
//! let config = ModelConfig {
//!     vocab_size: 32,
//!     d_model: 32,
//!     n_layers: 1,
//!     n_heads: 2,
//!     hidden_dim: 64,
//!     max_seq_len: 16,
//!     norm_eps: 1e-5,
//! };
//! let model = TransformerModel::random(config, 7, &RuntimeConfig::default()).unwrap();
//! let store = KvCacheStore::new(CacheBudget::default());
//! let session = store.open_session();
//!
//! let prefill = model.forward_session(&store, session, &[1, 2, 3]).unwrap();
//! assert_eq!(prefill.kind, StepKind::Prefill);
//! assert_eq!(prefill.logits.shape(), &[3, 32]);
//!
//! let next = model.decode(&store, session, 4).unwrap();
//! assert_eq!(next.kind, StepKind::Decode);
//! assert_eq!(store.current_length(session), 4);
//! ```

pub mod api;
mod core;
mod saf;

pub use saf::*;
