//! Quantized GEMM: C = A·Wᵀ with W block-quantized.
//!
//! Work is split the same way as the dense dispatcher splits it, so the
//! quantized path inherits the direct/skinny/blocked policy. Weight blocks
//! are decoded into a stack span just before use and shared by every row of
//! A in the current row block.

use crate::api::error::{QuantError, QuantResult};
use crate::api::types::*;
use crate::core::codec::*;
use crate::core::matrix::QuantizedMatrix;
use ember_core::{GemmDispatcher, KernelKind, MatMut, MatRef};
use std::time::Instant;

const SPAN: usize = SPAN_BLOCKS * QK;

/// Multiplication against block-quantized weights.
pub trait QuantizedGemm {
    /// C = A·Wᵀ where A is M×K and W holds N rows of K. C (M×N) is overwritten.
    fn matmul_quantized(&self, a: MatRef<'_>, w: &QuantizedMatrix, c: MatMut<'_>) -> QuantResult<()>;
}

impl QuantizedGemm for GemmDispatcher {
    fn matmul_quantized(&self, a: MatRef<'_>, w: &QuantizedMatrix, c: MatMut<'_>) -> QuantResult<()> {
        let (m, k, n) = (a.rows(), a.cols(), w.rows());
        if k != w.cols() {
            return Err(QuantError::ShapeMismatch {
                expected: vec![m, w.cols()],
                actual: vec![m, k],
            });
        }
        if c.rows() != m || c.cols() != n {
            return Err(QuantError::ShapeMismatch {
                expected: vec![m, n],
                actual: vec![c.rows(), c.cols()],
            });
        }

        let start = if log::log_enabled!(log::Level::Trace) {
            Some(Instant::now())
        } else {
            None
        };
        let kind = self.select(m, k, n);
        match w.format() {
            QuantFormat::Q8_0 => run::<BlockQ8_0>(self, kind, a, w, c),
            QuantFormat::Q5_0 => run::<BlockQ5_0>(self, kind, a, w, c),
            QuantFormat::Q4_1 => run::<BlockQ4_1>(self, kind, a, w, c),
            QuantFormat::Q4_0 => run::<BlockQ4_0>(self, kind, a, w, c),
        }
        if let Some(t) = start {
            log::trace!(
                "[perf] matmul_quantized::{} {} [{}x{}]x[{}x{}]^T {:.3}ms",
                w.format(),
                kind,
                m,
                k,
                n,
                k,
                t.elapsed().as_secs_f64() * 1000.0
            );
        }
        Ok(())
    }
}

fn run<C: BlockCodec>(gemm: &GemmDispatcher, kind: KernelKind, a: MatRef<'_>, w: &QuantizedMatrix, c: MatMut<'_>) {
    match kind {
        KernelKind::Direct => quantized_rows::<C>(gemm, a, w, 0, c),
        KernelKind::Skinny => gemm.par_column_chunks(c, |i, j0, out| {
            quantized_rows::<C>(gemm, a.sub_rows(i, i + 1), w, j0, out)
        }),
        KernelKind::Blocked => gemm.par_row_blocks(c, gemm.config().block_m, |i0, c_blk| {
            let rows = c_blk.rows();
            quantized_rows::<C>(gemm, a.sub_rows(i0, i0 + rows), w, 0, c_blk)
        }),
    }
}

/// c[i][x] = Σ_k a[i][k]·W[j0 + x][k] for every row of `a`.
fn quantized_rows<C: BlockCodec>(
    gemm: &GemmDispatcher,
    a: MatRef<'_>,
    w: &QuantizedMatrix,
    j0: usize,
    mut c: MatMut<'_>,
) {
    let mut span = [0.0f32; SPAN];
    c.fill_zero();
    for x in 0..c.cols() {
        let row = w.row_bytes(j0 + x);
        for (s, bytes) in row.chunks(SPAN_BLOCKS * C::BLOCK_BYTES).enumerate() {
            let len = bytes.len() / C::BLOCK_BYTES * QK;
            for (block, out) in bytes.chunks_exact(C::BLOCK_BYTES).zip(span.chunks_exact_mut(QK)) {
                C::decode_block(block, out);
            }
            let k0 = s * SPAN;
            let decoded = &span[..len];
            for i in 0..a.rows() {
                let partial = gemm.dot(&a.row(i)[k0..k0 + len], decoded);
                c.row_mut(i)[x] += partial;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::RuntimeConfig;

    #[test]
    fn test_shape_checks() {
        let gemm = RuntimeConfig::default().build_dispatcher().unwrap();
        let w = QuantizedMatrix::quantize(QuantFormat::Q8_0, &[1.0; 64], 2, 32).unwrap();
        let a = vec![0.0f32; 64];
        let mut c = vec![0.0f32; 2];
        let err = gemm
            .matmul_quantized(MatRef::new(&a, 1, 64).unwrap(), &w, MatMut::new(&mut c, 1, 2).unwrap())
            .unwrap_err();
        assert!(matches!(err, QuantError::ShapeMismatch { .. }));

        let mut wrong = vec![0.0f32; 3];
        let err = gemm
            .matmul_quantized(MatRef::new(&a, 2, 32).unwrap(), &w, MatMut::new(&mut wrong, 1, 3).unwrap())
            .unwrap_err();
        assert!(matches!(err, QuantError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_span_boundaries() {
        // K = 320 spans one full 8-block span plus a 2-block tail
        let gemm = RuntimeConfig::default().build_dispatcher().unwrap();
        let k = 320;
        let w = QuantizedMatrix::quantize(QuantFormat::Q8_0, &vec![127.0; k], 1, k).unwrap();
        let a: Vec<f32> = (0..k).map(|i| (i % 3) as f32).collect();
        let mut c = [0.0f32; 1];
        gemm.matmul_quantized(MatRef::new(&a, 1, k).unwrap(), &w, MatMut::new(&mut c, 1, 1).unwrap())
            .unwrap();
        let expected: f32 = a.iter().map(|v| v * 127.0).sum();
        assert_eq!(c[0], expected);
    }
}
