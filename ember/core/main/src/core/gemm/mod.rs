//! GEMM dispatcher.
//!
//! ## Kernel selection
//!
//! | Shape | Kernel | Threads |
//! |-------|--------|---------|
//! | M and K ≥ `parallel_threshold` | cache-blocked MR×NR microkernel | row blocks across workers |
//! | M ≤ `small_m_max`, N ≥ `gemv_par_threshold` | skinny (decode) | column chunks across workers |
//! | anything else | direct SIMD | calling thread |
//!
//! The SIMD backend is probed once when the dispatcher is built; the
//! dispatcher then holds function pointers to drivers monomorphized for
//! that backend.

mod driver;
mod kernels;

#[cfg(target_arch = "aarch64")]
mod arm;
#[cfg(target_arch = "x86_64")]
mod x86;

pub use driver::matmul_naive;

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{KernelKind, SimdLevel};
use crate::core::matrix::{MatMut, MatRef};
use crate::core::policy::ParallelPolicy;
use crate::core::runtime::{GemmConfig, RuntimeConfig};
use crate::core::tensor::Tensor;
use driver::BlockSizes;
use kernels::Kernels;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

type FullFn = fn(MatRef<'_>, MatRef<'_>, MatMut<'_>);
type BlockedFn = fn(BlockSizes, MatRef<'_>, MatRef<'_>, MatMut<'_>);
type ChunkFn = fn(&[f32], MatRef<'_>, usize, &mut [f32]);

/// Drivers monomorphized for one SIMD backend.
#[derive(Clone, Copy)]
struct KernelTable {
    level: SimdLevel,
    direct_nn: FullFn,
    direct_nt: FullFn,
    blocked_nn: BlockedFn,
    blocked_nt: BlockedFn,
    chunk_nn: ChunkFn,
    chunk_nt: ChunkFn,
    dot: fn(&[f32], &[f32]) -> f32,
    axpy: fn(&mut [f32], f32, &[f32]),
}

impl KernelTable {
    fn of<K: Kernels>() -> Self {
        Self {
            level: K::LEVEL,
            direct_nn: driver::direct_nn::<K>,
            direct_nt: driver::direct_nt::<K>,
            blocked_nn: driver::blocked_nn::<K>,
            blocked_nt: driver::blocked_nt::<K>,
            chunk_nn: driver::row_chunk_nn::<K>,
            chunk_nt: driver::row_chunk_nt::<K>,
            dot: K::dot,
            axpy: K::axpy,
        }
    }

    /// Caller guarantees `level` passed `SimdLevel::is_supported`.
    fn for_level(level: SimdLevel) -> Self {
        match level {
            #[cfg(target_arch = "x86_64")]
            SimdLevel::Avx2Fma => Self::of::<x86::Avx2Fma>(),
            #[cfg(target_arch = "aarch64")]
            SimdLevel::Neon => Self::of::<arm::Neon>(),
            _ => Self::of::<kernels::Portable>(),
        }
    }
}

/// Routes dense multiplies to the kernel suited to their shape.
///
/// Cheap to clone; clones share the worker pool.
#[derive(Clone)]
pub struct GemmDispatcher {
    config: GemmConfig,
    policy: ParallelPolicy,
    kernels: KernelTable,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl GemmDispatcher {
    /// Dispatcher for the detected SIMD level.
    pub fn new(runtime: &RuntimeConfig) -> TensorResult<Self> {
        Self::with_simd(runtime, SimdLevel::detect())
    }

    /// Dispatcher pinned to a SIMD level; unsupported levels fall back to portable code.
    pub fn with_simd(runtime: &RuntimeConfig, level: SimdLevel) -> TensorResult<Self> {
        runtime.gemm.validate()?;
        let level = if level.is_supported() {
            level
        } else {
            log::debug!("[gemm] {} unsupported on this CPU, using portable kernels", level);
            SimdLevel::Portable
        };
        let pool = if runtime.num_threads == 0 {
            None
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(runtime.num_threads)
                .thread_name(|i| format!("ember-gemm-{}", i))
                .build()
                .map_err(|e| {
                    TensorError::InvalidOperation(format!("Failed to build rayon thread pool: {}", e))
                })?;
            Some(Arc::new(pool))
        };
        Ok(Self {
            config: runtime.gemm.clone(),
            policy: ParallelPolicy::new(&runtime.gemm),
            kernels: KernelTable::for_level(level),
            pool,
        })
    }

    pub fn config(&self) -> &GemmConfig {
        &self.config
    }

    pub fn policy(&self) -> &ParallelPolicy {
        &self.policy
    }

    pub fn simd_level(&self) -> SimdLevel {
        self.kernels.level
    }

    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Run `op` on the dispatcher's worker pool.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Kernel family used for an M×K by K×N multiply.
    pub fn select(&self, m: usize, k: usize, n: usize) -> KernelKind {
        if self.policy.fan_out_blocked(m, k) {
            KernelKind::Blocked
        } else if self.policy.fan_out_columns(m, n) {
            KernelKind::Skinny
        } else {
            KernelKind::Direct
        }
    }

    /// Dot product with the selected backend.
    #[inline]
    pub fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        (self.kernels.dot)(a, b)
    }

    /// y += alpha·x with the selected backend.
    #[inline]
    pub fn axpy(&self, y: &mut [f32], alpha: f32, x: &[f32]) {
        (self.kernels.axpy)(y, alpha, x)
    }

    /// C = A·B. C is overwritten.
    pub fn matmul(&self, a: MatRef<'_>, b: MatRef<'_>, c: MatMut<'_>) -> TensorResult<()> {
        if a.cols() != b.rows() {
            return Err(TensorError::MatmulDimensionMismatch { left: a.cols(), right: b.rows() });
        }
        check_output(&c, a.rows(), b.cols())?;
        let kind = self.select(a.rows(), a.cols(), b.cols());
        let start = trace_start();
        match kind {
            KernelKind::Direct => (self.kernels.direct_nn)(a, b, c),
            KernelKind::Skinny => self.run_skinny(self.kernels.chunk_nn, a, b, c),
            KernelKind::Blocked => self.run_blocked(self.kernels.blocked_nn, a, b, c),
        }
        trace_done(start, "matmul", kind, a.rows(), a.cols(), b.cols());
        Ok(())
    }

    /// C = A·Bᵀ where `b_t` is stored N×K. C is overwritten.
    pub fn matmul_transposed(&self, a: MatRef<'_>, b_t: MatRef<'_>, c: MatMut<'_>) -> TensorResult<()> {
        if a.cols() != b_t.cols() {
            return Err(TensorError::MatmulDimensionMismatch { left: a.cols(), right: b_t.cols() });
        }
        check_output(&c, a.rows(), b_t.rows())?;
        let kind = self.select(a.rows(), a.cols(), b_t.rows());
        let start = trace_start();
        match kind {
            KernelKind::Direct => (self.kernels.direct_nt)(a, b_t, c),
            KernelKind::Skinny => self.run_skinny(self.kernels.chunk_nt, a, b_t, c),
            KernelKind::Blocked => self.run_blocked(self.kernels.blocked_nt, a, b_t, c),
        }
        trace_done(start, "matmul_t", kind, a.rows(), a.cols(), b_t.rows());
        Ok(())
    }

    /// Allocating convenience wrapper over [`matmul`](Self::matmul) for 2-D tensors.
    pub fn matmul_tensor(&self, a: &Tensor, b: &Tensor) -> TensorResult<Tensor> {
        let (am, bm) = (matrix_of(a)?, matrix_of(b)?);
        let mut out = Tensor::zeros([am.rows(), bm.cols()]);
        self.matmul(am, bm, out.mat_mut()?)?;
        Ok(out)
    }

    /// Allocating convenience wrapper over [`matmul_transposed`](Self::matmul_transposed).
    pub fn matmul_transposed_tensor(&self, a: &Tensor, b_t: &Tensor) -> TensorResult<Tensor> {
        let (am, bm) = (matrix_of(a)?, matrix_of(b_t)?);
        let mut out = Tensor::zeros([am.rows(), bm.rows()]);
        self.matmul_transposed(am, bm, out.mat_mut()?)?;
        Ok(out)
    }

    /// Split `c` into blocks of `block_rows` rows and run `f` on each block
    /// across the worker pool. `f` receives the block's first row index.
    pub fn par_row_blocks<F>(&self, c: MatMut<'_>, block_rows: usize, f: F)
    where
        F: Fn(usize, MatMut<'_>) + Send + Sync,
    {
        let (m, cols, ldc) = (c.rows(), c.cols(), c.stride());
        if m == 0 || cols == 0 || block_rows == 0 {
            return;
        }
        let data = c.into_data();
        self.install(|| {
            data.par_chunks_mut(block_rows * ldc)
                .enumerate()
                .for_each(|(bi, chunk)| {
                    let i0 = bi * block_rows;
                    let rows = block_rows.min(m - i0);
                    f(i0, MatMut::from_parts(chunk, rows, cols, ldc));
                });
        });
    }

    /// Split every row of `c` into column chunks across the worker pool.
    /// `f` receives the row index, the chunk's first column and a one-row view.
    pub fn par_column_chunks<F>(&self, mut c: MatMut<'_>, f: F)
    where
        F: Fn(usize, usize, MatMut<'_>) + Send + Sync,
    {
        let chunk = (c.cols() / self.num_threads().max(1)).max(kernels::NR * 8);
        for i in 0..c.rows() {
            let row = c.row_mut(i);
            self.install(|| {
                row.par_chunks_mut(chunk)
                    .enumerate()
                    .for_each(|(ci, out)| {
                        let width = out.len();
                        f(i, ci * chunk, MatMut::from_parts(out, 1, width, width));
                    });
            });
        }
    }

    fn run_blocked(&self, f: BlockedFn, a: MatRef<'_>, b: MatRef<'_>, c: MatMut<'_>) {
        let blocks = BlockSizes {
            kc: self.config.block_k,
            nc: self.config.block_n,
        };
        self.par_row_blocks(c, self.config.block_m, |i0, c_blk| {
            let rows = c_blk.rows();
            f(blocks, a.sub_rows(i0, i0 + rows), b, c_blk);
        });
    }

    fn run_skinny(&self, f: ChunkFn, a: MatRef<'_>, b: MatRef<'_>, c: MatMut<'_>) {
        self.par_column_chunks(c, |i, j0, mut out| f(a.row(i), b, j0, out.row_mut(0)));
    }
}

fn matrix_of(t: &Tensor) -> TensorResult<MatRef<'_>> {
    if t.ndim() != 2 {
        return Err(TensorError::InvalidOperation(format!(
            "matmul expects 2-D tensors, got shape {:?}",
            t.shape()
        )));
    }
    t.mat()
}

fn check_output(c: &MatMut<'_>, rows: usize, cols: usize) -> TensorResult<()> {
    if c.rows() != rows || c.cols() != cols {
        return Err(TensorError::ShapeMismatch {
            expected: vec![rows, cols],
            got: vec![c.rows(), c.cols()],
        });
    }
    Ok(())
}

#[inline]
fn trace_start() -> Option<Instant> {
    if log::log_enabled!(log::Level::Trace) {
        Some(Instant::now())
    } else {
        None
    }
}

#[inline]
fn trace_done(start: Option<Instant>, op: &str, kind: KernelKind, m: usize, k: usize, n: usize) {
    if let Some(t) = start {
        log::trace!(
            "[perf] gemm::{} {} [{}x{}]x[{}x{}] {:.3}ms",
            op,
            kind,
            m,
            k,
            k,
            n,
            t.elapsed().as_secs_f64() * 1000.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(config: GemmConfig) -> GemmDispatcher {
        let runtime = RuntimeConfig {
            gemm: config,
            ..RuntimeConfig::default()
        };
        GemmDispatcher::new(&runtime).unwrap()
    }

    #[test]
    fn test_matmul_2x2() {
        let gemm = dispatcher(GemmConfig::default());
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        let b = Tensor::from_vec(vec![5.0, 6.0, 7.0, 8.0], [2, 2]).unwrap();
        let c = gemm.matmul_tensor(&a, &b).unwrap();
        assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
        let ct = gemm.matmul_transposed_tensor(&a, &b).unwrap();
        assert_eq!(ct.as_slice(), &[17.0, 23.0, 39.0, 53.0]);
    }

    #[test]
    fn test_select_policy() {
        let gemm = dispatcher(GemmConfig::default());
        assert_eq!(gemm.select(32, 32, 32), KernelKind::Direct);
        assert_eq!(gemm.select(256, 256, 256), KernelKind::Blocked);
        assert_eq!(gemm.select(1, 768, 8192), KernelKind::Skinny);
        assert_eq!(gemm.select(1, 768, 768), KernelKind::Direct);
    }

    #[test]
    fn test_dimension_mismatch() {
        let gemm = dispatcher(GemmConfig::default());
        let a = Tensor::zeros([2, 3]);
        let b = Tensor::zeros([2, 3]);
        let err = gemm.matmul_tensor(&a, &b).unwrap_err();
        assert_eq!(err, TensorError::MatmulDimensionMismatch { left: 3, right: 2 });
    }

    #[test]
    fn test_output_shape_checked() {
        let gemm = dispatcher(GemmConfig::default());
        let a = vec![0.0f32; 6];
        let b = vec![0.0f32; 6];
        let mut c = vec![0.0f32; 6];
        let err = gemm
            .matmul(
                MatRef::new(&a, 2, 3).unwrap(),
                MatRef::new(&b, 3, 2).unwrap(),
                MatMut::new(&mut c, 3, 2).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_empty_reduction_yields_zeros() {
        let gemm = dispatcher(GemmConfig {
            parallel_threshold: 1,
            ..GemmConfig::default()
        });
        let a: Vec<f32> = Vec::new();
        let b: Vec<f32> = Vec::new();
        let mut c = vec![5.0f32; 6];
        gemm.matmul(
            MatRef::new(&a, 2, 0).unwrap(),
            MatRef::new(&b, 0, 3).unwrap(),
            MatMut::new(&mut c, 2, 3).unwrap(),
        )
        .unwrap();
        assert_eq!(c, vec![0.0; 6]);
    }

    #[test]
    fn test_dedicated_pool() {
        let runtime = RuntimeConfig {
            num_threads: 2,
            ..RuntimeConfig::default()
        };
        let gemm = GemmDispatcher::new(&runtime).unwrap();
        assert_eq!(gemm.num_threads(), 2);
        assert_eq!(gemm.install(rayon::current_num_threads), 2);
    }

    #[test]
    fn test_unsupported_level_falls_back() {
        let level = if cfg!(target_arch = "aarch64") {
            SimdLevel::Avx2Fma
        } else {
            SimdLevel::Neon
        };
        let gemm = GemmDispatcher::with_simd(&RuntimeConfig::default(), level).unwrap();
        assert_eq!(gemm.simd_level(), SimdLevel::Portable);
    }
}
