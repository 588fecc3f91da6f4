//! Row-wise activation and normalization kernels.
//!
//! All functions work in place or write into caller-provided slices.

use crate::api::error::{TensorError, TensorResult};

/// Numerically stable softmax over one row.
///
/// The row maximum is subtracted before exponentiation, so exp never
/// overflows and the sum is at least 1. Entries at −∞ come out as exactly 0.
/// A row whose maximum is −∞ (every entry masked) becomes all zeros.
#[inline]
pub fn softmax_in_place(row: &mut [f32]) {
    let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    if max == f32::NEG_INFINITY {
        row.fill(0.0);
        return;
    }
    let mut sum = 0.0f32;
    for v in row.iter_mut() {
        let e = (*v - max).exp();
        *v = e;
        sum += e;
    }
    let inv = 1.0 / sum;
    for v in row.iter_mut() {
        *v *= inv;
    }
}

/// Softmax over every `row_len`-sized row of `data`.
pub fn softmax_rows(data: &mut [f32], row_len: usize) -> TensorResult<()> {
    if row_len == 0 || data.len() % row_len != 0 {
        return Err(TensorError::InvalidOperation(format!(
            "softmax row length {} does not divide buffer of {}",
            row_len,
            data.len()
        )));
    }
    for row in data.chunks_exact_mut(row_len) {
        softmax_in_place(row);
    }
    Ok(())
}

/// Layer normalization of one row: (x - mean) / sqrt(var + eps) * gamma + beta.
pub fn layer_norm_row(input: &[f32], gamma: &[f32], beta: &[f32], eps: f32, out: &mut [f32]) {
    let n = input.len() as f32;
    let mean = input.iter().sum::<f32>() / n;
    let var = input.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
    let inv_std = 1.0 / (var + eps).sqrt();
    for (((o, x), g), b) in out.iter_mut().zip(input).zip(gamma).zip(beta) {
        *o = (x - mean) * inv_std * g + b;
    }
}

/// GELU (tanh approximation) in place.
pub fn gelu_in_place(data: &mut [f32]) {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    for x in data.iter_mut() {
        let v = *x;
        *x = 0.5 * v * (1.0 + (SQRT_2_OVER_PI * (v + 0.044_715 * v * v * v)).tanh());
    }
}

/// dst += src, elementwise.
#[inline]
pub fn add_in_place(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

/// data *= factor, elementwise.
#[inline]
pub fn scale_in_place(data: &mut [f32], factor: f32) {
    for v in data.iter_mut() {
        *v *= factor;
    }
}
