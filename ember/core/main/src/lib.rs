//! # Ember Core
//!
//! Tensor storage and the dense compute kernels of the Ember inference engine.
//!
//! This crate provides an f32 `Tensor`, bounds-validated matrix views, a
//! thread-safe buffer pool, and the GEMM dispatcher that routes each
//! multiplication to a direct, skinny or cache-blocked SIMD kernel.
//!
//! ## Example
//!
//! ```rust
//! use ember_core::{RuntimeConfig, Tensor};
//!
//! let gemm = RuntimeConfig::default().build_dispatcher().unwrap();
//! let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
//! let b = Tensor::from_vec(vec![5.0, 6.0, 7.0, 8.0], [2, 2]).unwrap();
//! let c = gemm.matmul_tensor(&a, &b).unwrap();
//! assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
//! ```

pub mod api;
mod core;
mod saf;

pub use saf::*;
