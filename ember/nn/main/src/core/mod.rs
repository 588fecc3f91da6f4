pub mod attention;
pub mod config;
pub mod feed_forward;
pub mod kv_cache;
pub mod layer_norm;
pub mod linear;
pub mod model;
pub mod session;
pub mod transformer_block;
