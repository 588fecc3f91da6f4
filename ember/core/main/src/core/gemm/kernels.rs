//! Register-level building blocks shared by every GEMM driver.
//!
//! Each SIMD backend implements [`Kernels`]; drivers are generic over it and
//! monomorphized once per backend, so the hot loops contain no dispatch.

use crate::api::types::SimdLevel;

/// Microkernel tile height (rows of A / C).
pub(crate) const MR: usize = 4;
/// Microkernel tile width (columns of B / C).
pub(crate) const NR: usize = 8;

pub(crate) trait Kernels: Send + Sync + 'static {
    const LEVEL: SimdLevel;

    /// Σ a[i]·b[i] over the shorter of the two slices.
    fn dot(a: &[f32], b: &[f32]) -> f32;

    /// y += alpha · x over the shorter of the two slices.
    fn axpy(y: &mut [f32], alpha: f32, x: &[f32]);

    /// C[0..MR, 0..NR] += A[0..MR, 0..kc] · B[0..kc, 0..NR].
    ///
    /// Requires `a.len() >= (MR-1)*lda + kc`, `b.len() >= (kc-1)*ldb + NR`
    /// and `c.len() >= (MR-1)*ldc + NR`.
    fn tile_nn(a: &[f32], lda: usize, b: &[f32], ldb: usize, kc: usize, c: &mut [f32], ldc: usize);

    /// Dot products of `MR` rows against one shared vector.
    fn dot_rows(a: [&[f32]; MR], b: &[f32]) -> [f32; MR];
}

#[inline(always)]
pub(crate) fn check_tile(a: &[f32], lda: usize, b: &[f32], ldb: usize, kc: usize, c: &[f32], ldc: usize) {
    assert!(kc > 0, "empty reduction tile");
    assert!(a.len() >= (MR - 1) * lda + kc, "A tile out of bounds");
    assert!(b.len() >= (kc - 1) * ldb + NR, "B tile out of bounds");
    assert!(c.len() >= (MR - 1) * ldc + NR, "C tile out of bounds");
}

/// Fixed-width chunked code the compiler vectorizes for the build target.
pub(crate) struct Portable;

impl Kernels for Portable {
    const LEVEL: SimdLevel = SimdLevel::Portable;

    #[inline]
    fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let (a, b) = (&a[..n], &b[..n]);
        let mut lanes = [0.0f32; 8];
        let mut ca = a.chunks_exact(8);
        let mut cb = b.chunks_exact(8);
        for (x, y) in (&mut ca).zip(&mut cb) {
            for l in 0..8 {
                lanes[l] += x[l] * y[l];
            }
        }
        let mut sum: f32 = lanes.iter().sum();
        for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
            sum += x * y;
        }
        sum
    }

    #[inline]
    fn axpy(y: &mut [f32], alpha: f32, x: &[f32]) {
        for (yv, xv) in y.iter_mut().zip(x) {
            *yv += alpha * xv;
        }
    }

    #[inline]
    fn tile_nn(a: &[f32], lda: usize, b: &[f32], ldb: usize, kc: usize, c: &mut [f32], ldc: usize) {
        check_tile(a, lda, b, ldb, kc, c, ldc);
        let mut acc = [[0.0f32; NR]; MR];
        for p in 0..kc {
            let b_row = &b[p * ldb..p * ldb + NR];
            for (r, acc_row) in acc.iter_mut().enumerate() {
                let a_val = a[r * lda + p];
                for (x, bv) in acc_row.iter_mut().zip(b_row) {
                    *x += a_val * bv;
                }
            }
        }
        for (r, acc_row) in acc.iter().enumerate() {
            let c_row = &mut c[r * ldc..r * ldc + NR];
            for (cv, x) in c_row.iter_mut().zip(acc_row) {
                *cv += x;
            }
        }
    }

    #[inline]
    fn dot_rows(a: [&[f32]; MR], b: &[f32]) -> [f32; MR] {
        [
            Self::dot(a[0], b),
            Self::dot(a[1], b),
            Self::dot(a[2], b),
            Self::dot(a[3], b),
        ]
    }
}
