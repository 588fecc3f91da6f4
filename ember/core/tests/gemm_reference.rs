//! Dispatcher kernels against a naive f64 reference across shapes and backends.

use ember_core::{
    matmul_naive, GemmConfig, GemmDispatcher, KernelKind, MatMut, MatRef, RuntimeConfig, SimdLevel,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Vec<f32> {
    (0..rows * cols).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// Reference C = A·B in f64 plus Σ|a·b| per element for the error bound.
fn reference_nn(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut c = vec![0.0f64; m * n];
    let mut mag = vec![0.0f64; m * n];
    for i in 0..m {
        for j in 0..n {
            for p in 0..k {
                let prod = a[i * k + p] as f64 * b[p * n + j] as f64;
                c[i * n + j] += prod;
                mag[i * n + j] += prod.abs();
            }
        }
    }
    (c, mag)
}

fn transpose(b: &[f32], k: usize, n: usize) -> Vec<f32> {
    let mut t = vec![0.0f32; k * n];
    for p in 0..k {
        for j in 0..n {
            t[j * k + p] = b[p * n + j];
        }
    }
    t
}

fn assert_close(got: &[f32], expected: &[f64], mag: &[f64], label: &str) {
    for (idx, ((g, e), m)) in got.iter().zip(expected).zip(mag).enumerate() {
        let tol = 1e-5 * m + 1e-6;
        assert!(
            (*g as f64 - e).abs() <= tol,
            "{}: element {} got {} expected {} (tol {})",
            label,
            idx,
            g,
            e,
            tol
        );
    }
}

fn dispatcher(config: GemmConfig, level: SimdLevel, threads: usize) -> GemmDispatcher {
    let runtime = RuntimeConfig {
        num_threads: threads,
        gemm: config,
        ..RuntimeConfig::default()
    };
    GemmDispatcher::with_simd(&runtime, level).unwrap()
}

fn check_shapes(gemm: &GemmDispatcher, shapes: &[(usize, usize, usize)], expect: KernelKind, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for &(m, k, n) in shapes {
        assert_eq!(gemm.select(m, k, n), expect, "shape {}x{}x{}", m, k, n);
        let a = random_matrix(&mut rng, m, k);
        let b = random_matrix(&mut rng, k, n);
        let b_t = transpose(&b, k, n);
        let (expected, mag) = reference_nn(&a, &b, m, k, n);

        let mut c = vec![f32::NAN; m * n];
        gemm.matmul(
            MatRef::new(&a, m, k).unwrap(),
            MatRef::new(&b, k, n).unwrap(),
            MatMut::new(&mut c, m, n).unwrap(),
        )
        .unwrap();
        assert_close(&c, &expected, &mag, &format!("nn {} {}x{}x{}", expect, m, k, n));

        let mut c_t = vec![f32::NAN; m * n];
        gemm.matmul_transposed(
            MatRef::new(&a, m, k).unwrap(),
            MatRef::new(&b_t, n, k).unwrap(),
            MatMut::new(&mut c_t, m, n).unwrap(),
        )
        .unwrap();
        assert_close(&c_t, &expected, &mag, &format!("nt {} {}x{}x{}", expect, m, k, n));
    }
}

fn levels() -> Vec<SimdLevel> {
    let detected = SimdLevel::detect();
    if detected == SimdLevel::Portable {
        vec![detected]
    } else {
        vec![detected, SimdLevel::Portable]
    }
}

#[test]
fn direct_kernel_matches_reference() {
    for level in levels() {
        let gemm = dispatcher(GemmConfig::default(), level, 0);
        check_shapes(&gemm, &[(1, 1, 1), (3, 5, 7), (1, 64, 33), (17, 31, 9), (127, 200, 65)], KernelKind::Direct, 1);
    }
}

#[test]
fn blocked_kernel_matches_reference_with_edge_tiles() {
    // Small blocks force several reduction/column blocks and partial MR×NR tiles
    let config = GemmConfig {
        parallel_threshold: 8,
        block_m: 12,
        block_k: 16,
        block_n: 20,
        ..GemmConfig::default()
    };
    for level in levels() {
        let gemm = dispatcher(config.clone(), level, 3);
        check_shapes(&gemm, &[(8, 8, 8), (13, 37, 41), (50, 33, 7), (64, 100, 1)], KernelKind::Blocked, 2);
    }
}

#[test]
fn blocked_kernel_default_blocks() {
    let gemm = dispatcher(GemmConfig::default(), SimdLevel::detect(), 0);
    check_shapes(&gemm, &[(130, 600, 70), (256, 128, 520)], KernelKind::Blocked, 3);
}

#[test]
fn skinny_kernel_matches_reference() {
    let config = GemmConfig {
        gemv_par_threshold: 64,
        ..GemmConfig::default()
    };
    for level in levels() {
        let gemm = dispatcher(config.clone(), level, 2);
        check_shapes(&gemm, &[(1, 96, 64), (4, 33, 300), (2, 7, 129)], KernelKind::Skinny, 4);
    }
}

#[test]
fn identity_times_vector_is_exact() {
    let n = 128;
    let gemm = dispatcher(GemmConfig::default(), SimdLevel::detect(), 0);
    assert_eq!(gemm.select(n, n, 1), KernelKind::Blocked);

    let mut eye = vec![0.0f32; n * n];
    for i in 0..n {
        eye[i * n + i] = 1.0;
    }
    let v: Vec<f32> = (0..n).map(|i| (i as f32 * 0.731).sin() * 100.0).collect();
    let mut out = vec![0.0f32; n];
    gemm.matmul(
        MatRef::new(&eye, n, n).unwrap(),
        MatRef::new(&v, n, 1).unwrap(),
        MatMut::new(&mut out, n, 1).unwrap(),
    )
    .unwrap();
    assert_eq!(out, v);

    // Same identity as stored weights: x · Iᵀ
    let mut out_t = vec![0.0f32; n];
    gemm.matmul_transposed(
        MatRef::new(&v, 1, n).unwrap(),
        MatRef::new(&eye, n, n).unwrap(),
        MatMut::new(&mut out_t, 1, n).unwrap(),
    )
    .unwrap();
    assert_eq!(out_t, v);
}

#[test]
fn permutation_times_vector_is_exact() {
    let n = 128;
    let gemm = dispatcher(GemmConfig::default(), SimdLevel::detect(), 0);
    // Row i selects element (i * 37 + 5) % n
    let mut perm = vec![0.0f32; n * n];
    for i in 0..n {
        perm[i * n + (i * 37 + 5) % n] = 1.0;
    }
    let v: Vec<f32> = (0..n).map(|i| i as f32 - 63.5).collect();
    let mut out = vec![0.0f32; n];
    gemm.matmul(
        MatRef::new(&perm, n, n).unwrap(),
        MatRef::new(&v, n, 1).unwrap(),
        MatMut::new(&mut out, n, 1).unwrap(),
    )
    .unwrap();
    for i in 0..n {
        assert_eq!(out[i], v[(i * 37 + 5) % n]);
    }
}

#[test]
fn strided_views_multiply_in_place() {
    // Multiply the middle 3 columns of a 4x6 buffer by a 3x2 matrix, writing
    // into columns 1..3 of a 4x5 output.
    let gemm = dispatcher(GemmConfig::default(), SimdLevel::detect(), 0);
    let a: Vec<f32> = (0..24).map(|x| x as f32).collect();
    let b = vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let mut c = vec![-1.0f32; 20];
    let a_view = MatRef::new(&a, 4, 6).unwrap().sub_cols(2, 5);
    gemm.matmul(
        a_view,
        MatRef::new(&b, 3, 2).unwrap(),
        MatMut::strided(&mut c[1..], 4, 2, 5).unwrap(),
    )
    .unwrap();
    // Row 0: a[0][2..5] = [2, 3, 4] -> [2 + 4, 3 + 4]
    assert_eq!(&c[0..5], &[-1.0, 6.0, 7.0, -1.0, -1.0]);
    // Row 3: [20, 21, 22] -> [42, 43]
    assert_eq!(&c[15..20], &[-1.0, 42.0, 43.0, -1.0, -1.0]);
}

#[test]
fn naive_reference_agrees_with_f64() {
    let mut rng = StdRng::seed_from_u64(9);
    let (m, k, n) = (5, 6, 7);
    let a = random_matrix(&mut rng, m, k);
    let b = random_matrix(&mut rng, k, n);
    let (expected, mag) = reference_nn(&a, &b, m, k, n);
    let mut c = vec![0.0f32; m * n];
    matmul_naive(
        MatRef::new(&a, m, k).unwrap(),
        MatRef::new(&b, k, n).unwrap(),
        MatMut::new(&mut c, m, n).unwrap(),
    );
    assert_close(&c, &expected, &mag, "naive");
}
