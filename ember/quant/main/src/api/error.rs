use ember_core::TensorError;
use thiserror::Error;

pub type QuantResult<T> = Result<T, QuantError>;

#[derive(Debug, Error)]
pub enum QuantError {
    #[error("Unsupported quantization format: {0}")]
    UnsupportedFormat(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    #[error("Block alignment error: {0}")]
    BlockAlignment(String),

    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),
}
