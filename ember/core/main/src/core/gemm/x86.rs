//! AVX2 + FMA backend.

use super::kernels::{check_tile, Kernels, MR, NR};
use crate::api::types::SimdLevel;
use std::arch::x86_64::*;

/// Selected only after the avx2+fma probe succeeds; every intrinsic call
/// below relies on that.
pub(crate) struct Avx2Fma;

impl Kernels for Avx2Fma {
    const LEVEL: SimdLevel = SimdLevel::Avx2Fma;

    #[inline]
    fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        // SAFETY: avx2+fma verified by the capability probe; reads stay within `n`.
        unsafe { dot_avx2(&a[..n], &b[..n]) }
    }

    #[inline]
    fn axpy(y: &mut [f32], alpha: f32, x: &[f32]) {
        let n = y.len().min(x.len());
        // SAFETY: as above; both slices trimmed to `n`.
        unsafe { axpy_avx2(&mut y[..n], alpha, &x[..n]) }
    }

    #[inline]
    fn tile_nn(a: &[f32], lda: usize, b: &[f32], ldb: usize, kc: usize, c: &mut [f32], ldc: usize) {
        check_tile(a, lda, b, ldb, kc, c, ldc);
        // SAFETY: bounds asserted by `check_tile`; avx2+fma verified by the probe.
        unsafe { tile_nn_avx2(a, lda, b, ldb, kc, c, ldc) }
    }

    #[inline]
    fn dot_rows(a: [&[f32]; MR], b: &[f32]) -> [f32; MR] {
        let n = a.iter().fold(b.len(), |n, row| n.min(row.len()));
        // SAFETY: every row and `b` hold at least `n` elements.
        unsafe { dot_rows_avx2(a, b, n) }
    }
}

#[inline]
#[target_feature(enable = "avx2,fma")]
unsafe fn hsum256(v: __m256) -> f32 {
    let hi = _mm256_extractf128_ps(v, 1);
    let lo = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(lo, hi);
    let shuf = _mm_movehdup_ps(sum128);
    let sums = _mm_add_ps(sum128, shuf);
    let shuf2 = _mm_movehl_ps(sums, sums);
    _mm_cvtss_f32(_mm_add_ss(sums, shuf2))
}

#[target_feature(enable = "avx2,fma")]
unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len();
    let pa = a.as_ptr();
    let pb = b.as_ptr();
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();
    let mut i = 0;
    while i + 16 <= n {
        acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
        acc1 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i + 8)), _mm256_loadu_ps(pb.add(i + 8)), acc1);
        i += 16;
    }
    if i + 8 <= n {
        acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
        i += 8;
    }
    let mut sum = hsum256(_mm256_add_ps(acc0, acc1));
    while i < n {
        sum += a[i] * b[i];
        i += 1;
    }
    sum
}

#[target_feature(enable = "avx2,fma")]
unsafe fn axpy_avx2(y: &mut [f32], alpha: f32, x: &[f32]) {
    let n = y.len();
    let py = y.as_mut_ptr();
    let px = x.as_ptr();
    let va = _mm256_set1_ps(alpha);
    let mut i = 0;
    while i + 8 <= n {
        let v = _mm256_fmadd_ps(va, _mm256_loadu_ps(px.add(i)), _mm256_loadu_ps(py.add(i)));
        _mm256_storeu_ps(py.add(i), v);
        i += 8;
    }
    while i < n {
        y[i] += alpha * x[i];
        i += 1;
    }
}

#[target_feature(enable = "avx2,fma")]
unsafe fn tile_nn_avx2(a: &[f32], lda: usize, b: &[f32], ldb: usize, kc: usize, c: &mut [f32], ldc: usize) {
    debug_assert_eq!(NR, 8);
    let pa = a.as_ptr();
    let pb = b.as_ptr();
    let mut c0 = _mm256_setzero_ps();
    let mut c1 = _mm256_setzero_ps();
    let mut c2 = _mm256_setzero_ps();
    let mut c3 = _mm256_setzero_ps();
    for p in 0..kc {
        let bv = _mm256_loadu_ps(pb.add(p * ldb));
        c0 = _mm256_fmadd_ps(_mm256_set1_ps(*pa.add(p)), bv, c0);
        c1 = _mm256_fmadd_ps(_mm256_set1_ps(*pa.add(lda + p)), bv, c1);
        c2 = _mm256_fmadd_ps(_mm256_set1_ps(*pa.add(2 * lda + p)), bv, c2);
        c3 = _mm256_fmadd_ps(_mm256_set1_ps(*pa.add(3 * lda + p)), bv, c3);
    }
    let pc = c.as_mut_ptr();
    for (r, acc) in [c0, c1, c2, c3].into_iter().enumerate() {
        let dst = pc.add(r * ldc);
        _mm256_storeu_ps(dst, _mm256_add_ps(_mm256_loadu_ps(dst), acc));
    }
}

#[target_feature(enable = "avx2,fma")]
unsafe fn dot_rows_avx2(a: [&[f32]; MR], b: &[f32], n: usize) -> [f32; MR] {
    let pb = b.as_ptr();
    let (p0, p1, p2, p3) = (a[0].as_ptr(), a[1].as_ptr(), a[2].as_ptr(), a[3].as_ptr());
    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();
    let mut s2 = _mm256_setzero_ps();
    let mut s3 = _mm256_setzero_ps();
    let mut i = 0;
    while i + 8 <= n {
        let bv = _mm256_loadu_ps(pb.add(i));
        s0 = _mm256_fmadd_ps(_mm256_loadu_ps(p0.add(i)), bv, s0);
        s1 = _mm256_fmadd_ps(_mm256_loadu_ps(p1.add(i)), bv, s1);
        s2 = _mm256_fmadd_ps(_mm256_loadu_ps(p2.add(i)), bv, s2);
        s3 = _mm256_fmadd_ps(_mm256_loadu_ps(p3.add(i)), bv, s3);
        i += 8;
    }
    let mut out = [hsum256(s0), hsum256(s1), hsum256(s2), hsum256(s3)];
    while i < n {
        let bv = b[i];
        for (o, row) in out.iter_mut().zip(a.iter()) {
            *o += row[i] * bv;
        }
        i += 1;
    }
    out
}
