//! NEON backend.

use super::kernels::{check_tile, Kernels, MR};
use crate::api::types::SimdLevel;
use std::arch::aarch64::*;

/// NEON is part of the aarch64 baseline.
pub(crate) struct Neon;

impl Kernels for Neon {
    const LEVEL: SimdLevel = SimdLevel::Neon;

    #[inline]
    fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        // SAFETY: reads stay within `n` elements of both slices.
        unsafe { dot_neon(&a[..n], &b[..n]) }
    }

    #[inline]
    fn axpy(y: &mut [f32], alpha: f32, x: &[f32]) {
        let n = y.len().min(x.len());
        // SAFETY: both slices trimmed to `n`.
        unsafe { axpy_neon(&mut y[..n], alpha, &x[..n]) }
    }

    #[inline]
    fn tile_nn(a: &[f32], lda: usize, b: &[f32], ldb: usize, kc: usize, c: &mut [f32], ldc: usize) {
        check_tile(a, lda, b, ldb, kc, c, ldc);
        // SAFETY: bounds asserted by `check_tile`.
        unsafe { tile_nn_neon(a, lda, b, ldb, kc, c, ldc) }
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

#[inline]
unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len();
    let pa = a.as_ptr();
    let pb = b.as_ptr();
    let mut acc0 = vdupq_n_f32(0.0);
    let mut acc1 = vdupq_n_f32(0.0);
    let mut i = 0;
    while i + 8 <= n {
        acc0 = vfmaq_f32(acc0, vld1q_f32(pa.add(i)), vld1q_f32(pb.add(i)));
        acc1 = vfmaq_f32(acc1, vld1q_f32(pa.add(i + 4)), vld1q_f32(pb.add(i + 4)));
        i += 8;
    }
    let mut sum = vaddvq_f32(vaddq_f32(acc0, acc1));
    while i < n {
        sum += a[i] * b[i];
        i += 1;
    }
    sum
}

#[inline]
unsafe fn axpy_neon(y: &mut [f32], alpha: f32, x: &[f32]) {
    let n = y.len();
    let py = y.as_mut_ptr();
    let px = x.as_ptr();
    let mut i = 0;
    while i + 4 <= n {
        let v = vfmaq_n_f32(vld1q_f32(py.add(i)), vld1q_f32(px.add(i)), alpha);
        vst1q_f32(py.add(i), v);
        i += 4;
    }
    while i < n {
        y[i] += alpha * x[i];
        i += 1;
    }
}

unsafe fn tile_nn_neon(a: &[f32], lda: usize, b: &[f32], ldb: usize, kc: usize, c: &mut [f32], ldc: usize) {
    let pa = a.as_ptr();
    let pb = b.as_ptr();
    let zero = vdupq_n_f32(0.0);
    let mut acc = [[zero; 2]; MR];
    for p in 0..kc {
        let b_lo = vld1q_f32(pb.add(p * ldb));
        let b_hi = vld1q_f32(pb.add(p * ldb + 4));
        for (r, acc_row) in acc.iter_mut().enumerate() {
            let av = *pa.add(r * lda + p);
            acc_row[0] = vfmaq_n_f32(acc_row[0], b_lo, av);
            acc_row[1] = vfmaq_n_f32(acc_row[1], b_hi, av);
        }
    }
    let pc = c.as_mut_ptr();
    for (r, acc_row) in acc.iter().enumerate() {
        let dst = pc.add(r * ldc);
        vst1q_f32(dst, vaddq_f32(vld1q_f32(dst), acc_row[0]));
        vst1q_f32(dst.add(4), vaddq_f32(vld1q_f32(dst.add(4)), acc_row[1]));
    }
}
