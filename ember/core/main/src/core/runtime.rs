use crate::api::error::{TensorError, TensorResult};
use crate::api::types::SimdLevel;
use crate::core::arena::TensorPool;
use crate::core::gemm::GemmDispatcher;
use serde::Deserialize;
use std::sync::Arc;

/// Tuning constants for the GEMM dispatcher.
///
/// Passed explicitly at construction; nothing is read from globals.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GemmConfig {
    /// Rows and reduction depth at which the blocked, multi-threaded kernel
    /// takes over from the direct kernel (default 128).
    pub parallel_threshold: usize,
    /// Largest M treated as a decode-style skinny multiply (default 4).
    pub small_m_max: usize,
    /// Minimum N for fanning a skinny multiply out over columns (default 4096).
    pub gemv_par_threshold: usize,
    /// Rows per parallel block (default 64).
    pub block_m: usize,
    /// Reduction depth per block (default 512).
    pub block_k: usize,
    /// Columns per block (default 512).
    pub block_n: usize,
}

impl Default for GemmConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 128,
            small_m_max: 4,
            gemv_par_threshold: 4096,
            block_m: 64,
            block_k: 512,
            block_n: 512,
        }
    }
}

impl GemmConfig {
    pub fn validate(&self) -> TensorResult<()> {
        for (name, value) in [
            ("block_m", self.block_m),
            ("block_k", self.block_k),
            ("block_n", self.block_n),
            ("parallel_threshold", self.parallel_threshold),
        ] {
            if value == 0 {
                return Err(TensorError::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

/// Runtime configuration for parallelism, pooling and kernel tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads for the dispatcher's pool.
    /// 0 means the shared rayon pool (all available cores).
    pub num_threads: usize,
    /// Maximum number of cached buffers in the tensor pool (default 64).
    pub pool_capacity: usize,
    pub gemm: GemmConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            pool_capacity: 64,
            gemm: GemmConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> TensorResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TensorError::InvalidConfig(format!("runtime config: {}", e)))?;
        config.gemm.validate()?;
        Ok(config)
    }

    /// Probe SIMD support once and build a dispatcher bound to this configuration.
    pub fn build_dispatcher(&self) -> TensorResult<GemmDispatcher> {
        let simd = Self::detect_simd();
        let dispatcher = GemmDispatcher::with_simd(self, simd)?;
        log::info!(
            "[runtime] SIMD: {}, threads: {}",
            simd,
            dispatcher.num_threads()
        );
        Ok(dispatcher)
    }

    /// Buffer pool sized by `pool_capacity`.
    pub fn build_pool(&self) -> Arc<TensorPool> {
        Arc::new(TensorPool::new(self.pool_capacity))
    }

    /// Detect the best available SIMD instruction set.
    pub fn detect_simd() -> SimdLevel {
        SimdLevel::detect()
    }
}

/// Optimization profiles for A/B benchmarking.
///
/// Controls the crossover thresholds between the direct and parallel kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptProfile {
    /// Default thresholds.
    Optimized,
    /// Never fan out: every multiply runs the direct kernel on the calling thread.
    Baseline,
    /// Lower thresholds (32) for aggressive parallelism.
    Aggressive,
}

impl OptProfile {
    /// Build a `RuntimeConfig` matching this profile.
    pub fn runtime_config(&self) -> RuntimeConfig {
        match self {
            OptProfile::Optimized => RuntimeConfig::default(),
            OptProfile::Baseline => RuntimeConfig {
                gemm: GemmConfig {
                    parallel_threshold: usize::MAX,
                    gemv_par_threshold: usize::MAX,
                    ..GemmConfig::default()
                },
                ..RuntimeConfig::default()
            },
            OptProfile::Aggressive => RuntimeConfig {
                gemm: GemmConfig {
                    parallel_threshold: 32,
                    gemv_par_threshold: 1024,
                    ..GemmConfig::default()
                },
                ..RuntimeConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.num_threads, 0);
        assert_eq!(config.pool_capacity, 64);
        assert_eq!(config.gemm.parallel_threshold, 128);
        assert_eq!((config.gemm.block_m, config.gemm.block_k, config.gemm.block_n), (64, 512, 512));
    }

    #[test]
    fn test_from_json_partial() {
        let config = RuntimeConfig::from_json_str(
            r#"{"num_threads": 2, "gemm": {"parallel_threshold": 256, "block_k": 256}}"#,
        )
        .unwrap();
        assert_eq!(config.num_threads, 2);
        assert_eq!(config.gemm.parallel_threshold, 256);
        assert_eq!(config.gemm.block_k, 256);
        assert_eq!(config.gemm.block_m, 64);
        assert_eq!(config.pool_capacity, 64);
    }

    #[test]
    fn test_from_json_rejects_zero_block() {
        let err = RuntimeConfig::from_json_str(r#"{"gemm": {"block_n": 0}}"#).unwrap_err();
        assert!(matches!(err, TensorError::InvalidConfig(_)));
    }

    #[test]
    fn test_profiles() {
        let baseline = OptProfile::Baseline.runtime_config();
        assert_eq!(baseline.gemm.parallel_threshold, usize::MAX);
        let aggressive = OptProfile::Aggressive.runtime_config();
        assert!(aggressive.gemm.parallel_threshold < RuntimeConfig::default().gemm.parallel_threshold);
        assert_eq!(OptProfile::Optimized.runtime_config(), RuntimeConfig::default());
    }

    #[test]
    fn test_detect_simd() {
        let level = RuntimeConfig::detect_simd();
        assert!(level.is_supported());
    }
}
