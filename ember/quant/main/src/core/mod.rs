pub mod codec;
pub mod matmul;
pub mod matrix;
