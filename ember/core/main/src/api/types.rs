//! Core types shared across the engine

use smallvec::SmallVec;
use std::fmt;

/// Tensor shape; up to four dimensions stay on the stack.
pub type TensorShape = SmallVec<[usize; 4]>;

/// Instruction set chosen by the one-time capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimdLevel {
    /// x86_64 with AVX2 and FMA.
    Avx2Fma,
    /// aarch64 Advanced SIMD.
    Neon,
    /// Chunked scalar code left to the auto-vectorizer.
    Portable,
}

impl SimdLevel {
    /// Probe the running CPU for the best supported level.
    pub fn detect() -> Self {
        if avx2_fma_available() {
            return SimdLevel::Avx2Fma;
        }
        if cfg!(target_arch = "aarch64") {
            // NEON is always available on aarch64
            return SimdLevel::Neon;
        }
        SimdLevel::Portable
    }

    /// Whether the running CPU can execute kernels of this level.
    pub fn is_supported(&self) -> bool {
        match self {
            SimdLevel::Portable => true,
            SimdLevel::Avx2Fma => avx2_fma_available(),
            SimdLevel::Neon => cfg!(target_arch = "aarch64"),
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn avx2_fma_available() -> bool {
    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

#[cfg(not(target_arch = "x86_64"))]
fn avx2_fma_available() -> bool {
    false
}

impl fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimdLevel::Avx2Fma => write!(f, "AVX2+FMA"),
            SimdLevel::Neon => write!(f, "NEON"),
            SimdLevel::Portable => write!(f, "portable"),
        }
    }
}

/// Kernel family the dispatcher selects for a problem size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    /// Single-threaded, non-tiled SIMD kernel.
    Direct,
    /// Small-M kernel with each output row split into column chunks across workers.
    Skinny,
    /// Cache-blocked tiled kernel with row blocks spread across workers.
    Blocked,
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelKind::Direct => write!(f, "direct"),
            KernelKind::Skinny => write!(f, "skinny"),
            KernelKind::Blocked => write!(f, "blocked"),
        }
    }
}
