use ember_core::{GemmDispatcher, Tensor, TensorPool};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Geometry a KV cache was built for. A cache is only usable by a model
/// with the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheShape {
    pub n_layers: usize,
    pub n_heads: usize,
    pub head_dim: usize,
}

impl fmt::Display for CacheShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} layers x {} heads x {} dims",
            self.n_layers, self.n_heads, self.head_dim
        )
    }
}

/// Opaque id of one conversation's cached context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a step built the context or extended it by one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Prefill,
    Decode,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Prefill => write!(f, "prefill"),
            StepKind::Decode => write!(f, "decode"),
        }
    }
}

/// Result of a session step.
#[derive(Debug)]
pub struct ForwardOutput {
    /// `[computed, vocab_size]` logits, one row per newly computed position.
    pub logits: Tensor,
    pub kind: StepKind,
    /// Cached positions reused from the session (also the first computed position).
    pub reused: usize,
    /// Positions computed by this step.
    pub computed: usize,
}

/// Limits across all sessions of a [`KvCacheStore`](crate::KvCacheStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheBudget {
    /// Cached token positions summed over sessions.
    pub max_tokens: usize,
    /// Bytes of key/value storage summed over sessions.
    pub max_bytes: usize,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self {
            max_tokens: 1 << 20,
            max_bytes: 1 << 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub sessions: usize,
    pub tokens: usize,
    pub bytes: usize,
    pub evictions: usize,
}

/// Kernels and scratch memory shared by every layer during one step.
#[derive(Clone, Copy)]
pub struct Workspace<'a> {
    pub gemm: &'a GemmDispatcher,
    pub pool: &'a TensorPool,
}
