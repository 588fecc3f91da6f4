//! Error types for neural network operations

use crate::api::types::{CacheShape, SessionHandle};
use ember_core::TensorError;
use ember_quant::QuantError;
use thiserror::Error;

/// Result type for neural network operations
pub type NnResult<T> = Result<T, NnError>;

/// Errors that can occur in neural network operations
#[derive(Error, Debug)]
pub enum NnError {
    #[error("Tensor error: {0}")]
    TensorError(#[from] TensorError),

    #[error("Quantization error: {0}")]
    QuantError(#[from] QuantError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("KV cache shape mismatch: expected {expected}, got {got}")]
    CacheShapeMismatch { expected: CacheShape, got: CacheShape },

    #[error("KV cache capacity exceeded: {requested} positions requested, capacity {capacity}")]
    CacheCapacityExceeded { requested: usize, capacity: usize },

    #[error("Token id {token} out of range for vocabulary of {vocab_size}")]
    TokenOutOfRange { token: u32, vocab_size: usize },

    #[error("Empty token sequence")]
    EmptyInput,

    #[error("No cached context for session {0}")]
    CacheMiss(SessionHandle),
}

impl NnError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, NnError::CacheCapacityExceeded { .. })
    }

    pub fn is_unsupported_format(&self) -> bool {
        matches!(self, NnError::QuantError(QuantError::UnsupportedFormat(_)))
    }
}
