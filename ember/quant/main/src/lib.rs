//! # Ember Quant
//!
//! Block-quantized weights for the Ember inference engine.
//!
//! Weights are stored in GGML-compatible 32-element blocks (Q8_0, Q5_0,
//! Q4_1, Q4_0). The quantized GEMM never materializes a dense copy of the
//! weight matrix: each block is decoded into a stack buffer right before it
//! is consumed by the dot-product kernel.
//!
//! ## Example
//!
//! ```rust
//! use ember_core::{MatMut, MatRef, RuntimeConfig};
//! use ember_quant::{QuantFormat, QuantizedGemm, QuantizedMatrix};
//!
//! let gemm = RuntimeConfig::default().build_dispatcher().unwrap();
//! // Two output features over 32 inputs
//! let weights: Vec<f32> = (0..64).map(|i| if i < 32 { 127.0 } else { -127.0 }).collect();
//! let w = QuantizedMatrix::quantize(QuantFormat::Q8_0, &weights, 2, 32).unwrap();
//!
//! let x = vec![0.5f32; 32];
//! let mut y = vec![0.0f32; 2];
//! gemm.matmul_quantized(
//!     MatRef::new(&x, 1, 32).unwrap(),
//!     &w,
//!     MatMut::new(&mut y, 1, 2).unwrap(),
//! )
//! .unwrap();
//! assert_eq!(y, vec![2032.0, -2032.0]);
//! ```

pub mod api;
mod core;
mod saf;

pub use saf::*;
