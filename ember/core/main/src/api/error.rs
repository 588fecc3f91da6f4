//! Error types for tensor and GEMM operations

use thiserror::Error;

/// Result type for tensor operations
pub type TensorResult<T> = Result<T, TensorError>;

/// Errors that can occur during tensor operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Matmul dimension mismatch: left inner dim {left}, right inner dim {right}")]
    MatmulDimensionMismatch { left: usize, right: usize },

    #[error("Matrix view out of bounds: requires {required} elements, buffer holds {available}")]
    ViewOutOfBounds { required: usize, available: usize },

    #[error("Index {index} out of bounds for dimension {dim} with size {size}")]
    IndexOutOfBounds { dim: usize, index: usize, size: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}
