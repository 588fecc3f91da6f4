//! Facade re-exports for ember-quant

pub use crate::api::error::*;
pub use crate::api::types::*;
pub use crate::core::codec::{BlockCodec, BlockQ4_0, BlockQ4_1, BlockQ5_0, BlockQ8_0};
pub use crate::core::matmul::QuantizedGemm;
pub use crate::core::matrix::{dequantize, quantize, QuantizedMatrix};
