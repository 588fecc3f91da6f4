//! Facade re-exports for ember-core

pub use crate::api::error::*;
pub use crate::api::types::*;
pub use crate::core::arena::{PoolStats, Pooled, TensorPool};
pub use crate::core::gemm::{matmul_naive, GemmDispatcher};
pub use crate::core::matrix::{MatMut, MatRef};
pub use crate::core::ops::{
    add_in_place, gelu_in_place, layer_norm_row, scale_in_place, softmax_in_place, softmax_rows,
};
pub use crate::core::policy::ParallelPolicy;
pub use crate::core::runtime::{GemmConfig, OptProfile, RuntimeConfig};
pub use crate::core::tensor::Tensor;
