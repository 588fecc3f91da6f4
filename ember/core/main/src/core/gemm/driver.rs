//! Loop nests around the microkernels.
//!
//! Every driver overwrites its output region and allocates nothing: tiles
//! accumulate in registers or stack arrays, and no operand is packed.

use super::kernels::{Kernels, MR, NR};
use crate::core::matrix::{MatMut, MatRef};

/// Block sizes for the cache-blocked drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockSizes {
    pub kc: usize,
    pub nc: usize,
}

/// C = A·B, one row at a time with AXPY over rows of B.
pub(crate) fn direct_nn<K: Kernels>(a: MatRef<'_>, b: MatRef<'_>, mut c: MatMut<'_>) {
    for i in 0..a.rows() {
        let c_row = c.row_mut(i);
        c_row.fill(0.0);
        for (p, &a_ip) in a.row(i).iter().enumerate() {
            K::axpy(c_row, a_ip, b.row(p));
        }
    }
}

/// C = A·Bᵀ as row-by-row dot products.
pub(crate) fn direct_nt<K: Kernels>(a: MatRef<'_>, b_t: MatRef<'_>, mut c: MatMut<'_>) {
    for i in 0..a.rows() {
        let a_row = a.row(i);
        for (j, out) in c.row_mut(i).iter_mut().enumerate() {
            *out = K::dot(a_row, b_t.row(j));
        }
    }
}

/// C[:, j0..j0+width] = A·B[:, j0..j0+width] for a single output row chunk.
pub(crate) fn row_chunk_nn<K: Kernels>(a_row: &[f32], b: MatRef<'_>, j0: usize, out: &mut [f32]) {
    out.fill(0.0);
    let width = out.len();
    for (p, &a_ip) in a_row.iter().enumerate() {
        K::axpy(out, a_ip, &b.row(p)[j0..j0 + width]);
    }
}

/// out[x] = a_row · b_t[j0 + x] for a single output row chunk.
pub(crate) fn row_chunk_nt<K: Kernels>(a_row: &[f32], b_t: MatRef<'_>, j0: usize, out: &mut [f32]) {
    for (x, o) in out.iter_mut().enumerate() {
        *o = K::dot(a_row, b_t.row(j0 + x));
    }
}

/// Cache-blocked C = A·B for one row block of A and C.
///
/// Loop order: reduction block (kc) → column block (nc) → MR×NR register tiles.
pub(crate) fn blocked_nn<K: Kernels>(blocks: BlockSizes, a: MatRef<'_>, b: MatRef<'_>, mut c: MatMut<'_>) {
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    let (lda, ldb, ldc) = (a.stride(), b.stride(), c.stride());
    c.fill_zero();
    if m == 0 || n == 0 {
        return;
    }

    let mut k0 = 0;
    while k0 < k {
        let kc = blocks.kc.min(k - k0);
        let mut j0 = 0;
        while j0 < n {
            let nc = blocks.nc.min(n - j0);
            let mut i = 0;
            while i + MR <= m {
                let mut j = j0;
                while j + NR <= j0 + nc {
                    K::tile_nn(
                        &a.data()[i * lda + k0..],
                        lda,
                        &b.data()[k0 * ldb + j..],
                        ldb,
                        kc,
                        &mut c.data_mut()[i * ldc + j..],
                        ldc,
                    );
                    j += NR;
                }
                if j < j0 + nc {
                    edge_nn(a, b, &mut c, i..i + MR, k0..k0 + kc, j..j0 + nc);
                }
                i += MR;
            }
            if i < m {
                edge_nn(a, b, &mut c, i..m, k0..k0 + kc, j0..j0 + nc);
            }
            j0 += nc;
        }
        k0 += kc;
    }
}

/// Scalar accumulation for partial tiles at the right and bottom edges.
fn edge_nn(
    a: MatRef<'_>,
    b: MatRef<'_>,
    c: &mut MatMut<'_>,
    rows: std::ops::Range<usize>,
    depth: std::ops::Range<usize>,
    cols: std::ops::Range<usize>,
) {
    for i in rows {
        let a_row = a.row(i);
        let c_row = &mut c.row_mut(i)[cols.clone()];
        for p in depth.clone() {
            let a_val = a_row[p];
            let b_row = &b.row(p)[cols.clone()];
            for (cv, bv) in c_row.iter_mut().zip(b_row) {
                *cv += a_val * bv;
            }
        }
    }
}

/// Cache-blocked C = A·Bᵀ for one row block of A and C.
///
/// Each row of Bᵀ is loaded once per reduction block and dotted against
/// MR rows of A.
pub(crate) fn blocked_nt<K: Kernels>(blocks: BlockSizes, a: MatRef<'_>, b_t: MatRef<'_>, mut c: MatMut<'_>) {
    let (m, k, n) = (a.rows(), a.cols(), b_t.rows());
    c.fill_zero();
    if m == 0 || n == 0 {
        return;
    }

    let mut k0 = 0;
    while k0 < k {
        let kc = blocks.kc.min(k - k0);
        let depth = k0..k0 + kc;
        let mut j0 = 0;
        while j0 < n {
            let nc = blocks.nc.min(n - j0);
            let mut i = 0;
            while i + MR <= m {
                let rows = [
                    &a.row(i)[depth.clone()],
                    &a.row(i + 1)[depth.clone()],
                    &a.row(i + 2)[depth.clone()],
                    &a.row(i + 3)[depth.clone()],
                ];
                for j in j0..j0 + nc {
                    let sums = K::dot_rows(rows, &b_t.row(j)[depth.clone()]);
                    for (r, s) in sums.iter().enumerate() {
                        c.row_mut(i + r)[j] += s;
                    }
                }
                i += MR;
            }
            for ii in i..m {
                let a_seg = &a.row(ii)[depth.clone()];
                for j in j0..j0 + nc {
                    let s = K::dot(a_seg, &b_t.row(j)[depth.clone()]);
                    c.row_mut(ii)[j] += s;
                }
            }
            j0 += nc;
        }
        k0 += kc;
    }
}

/// Scalar triple loop. Reference for tests and benchmarks.
pub fn matmul_naive(a: MatRef<'_>, b: MatRef<'_>, mut c: MatMut<'_>) {
    for i in 0..a.rows() {
        for j in 0..b.cols() {
            let mut sum = 0.0f32;
            for p in 0..a.cols() {
                sum += a.row(i)[p] * b.row(p)[j];
            }
            c.row_mut(i)[j] = sum;
        }
    }
}
