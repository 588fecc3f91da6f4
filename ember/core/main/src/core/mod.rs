pub mod arena;
pub mod gemm;
pub mod matrix;
pub mod ops;
pub mod policy;
pub mod runtime;
pub mod tensor;
