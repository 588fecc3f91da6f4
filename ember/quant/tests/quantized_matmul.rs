//! Quantized GEMM against dense references, across formats and kernel paths.

use ember_core::{GemmConfig, GemmDispatcher, KernelKind, MatMut, MatRef, RuntimeConfig};
use ember_quant::{QuantError, QuantFormat, QuantizedGemm, QuantizedMatrix, QK};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn dispatcher(config: GemmConfig, threads: usize) -> GemmDispatcher {
    GemmDispatcher::new(&RuntimeConfig {
        num_threads: threads,
        gemm: config,
        ..RuntimeConfig::default()
    })
    .unwrap()
}

/// Check C = A·Wᵀ against both the dequantized weights (tight) and the
/// original f32 weights (within the format's error bound).
fn check(gemm: &GemmDispatcher, format: QuantFormat, m: usize, k: usize, n: usize, expect: KernelKind, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = random(&mut rng, m * k);
    let w = random(&mut rng, n * k);
    let q = QuantizedMatrix::quantize(format, &w, n, k).unwrap();
    let w_hat = q.dequantize().unwrap();

    assert_eq!(gemm.select(m, k, n), expect);
    let mut c = vec![f32::NAN; m * n];
    gemm.matmul_quantized(MatRef::new(&a, m, k).unwrap(), &q, MatMut::new(&mut c, m, n).unwrap())
        .unwrap();

    let ratio = format.max_error_ratio() as f64;
    for i in 0..m {
        for j in 0..n {
            let mut exact = 0.0f64;
            let mut decoded = 0.0f64;
            let mut mag = 0.0f64;
            let mut bound = 0.0f64;
            for b in 0..k / QK {
                let block = &w[j * k + b * QK..j * k + (b + 1) * QK];
                let block_max = block.iter().fold(0.0f32, |acc, v| acc.max(v.abs())) as f64;
                for p in b * QK..(b + 1) * QK {
                    let av = a[i * k + p] as f64;
                    exact += av * w[j * k + p] as f64;
                    decoded += av * w_hat[j * k + p] as f64;
                    mag += (av * w_hat[j * k + p] as f64).abs();
                    bound += av.abs() * ratio * block_max;
                }
            }
            let got = c[i * n + j] as f64;
            assert!(
                (got - decoded).abs() <= 1e-5 * mag + 1e-5,
                "{} {} ({}, {}): {} vs dequantized {}",
                format,
                expect,
                i,
                j,
                got,
                decoded
            );
            assert!(
                (got - exact).abs() <= bound + 1e-5 * mag + 1e-4,
                "{} {} ({}, {}): {} vs f32 {} (bound {})",
                format,
                expect,
                i,
                j,
                got,
                exact,
                bound
            );
        }
    }
}

#[test]
fn direct_path_all_formats() {
    let gemm = dispatcher(GemmConfig::default(), 0);
    for (s, format) in QuantFormat::ALL.into_iter().enumerate() {
        check(&gemm, format, 3, 96, 17, KernelKind::Direct, s as u64);
        check(&gemm, format, 1, 288, 5, KernelKind::Direct, 10 + s as u64);
    }
}

#[test]
fn skinny_path_all_formats() {
    let config = GemmConfig {
        gemv_par_threshold: 16,
        ..GemmConfig::default()
    };
    let gemm = dispatcher(config, 3);
    for (s, format) in QuantFormat::ALL.into_iter().enumerate() {
        check(&gemm, format, 2, 64, 150, KernelKind::Skinny, 20 + s as u64);
    }
}

#[test]
fn blocked_path_all_formats() {
    let config = GemmConfig {
        parallel_threshold: 16,
        block_m: 7,
        ..GemmConfig::default()
    };
    let gemm = dispatcher(config, 2);
    for (s, format) in QuantFormat::ALL.into_iter().enumerate() {
        check(&gemm, format, 30, 320, 9, KernelKind::Blocked, 30 + s as u64);
    }
}

#[test]
fn unsupported_format_is_rejected_at_load() {
    assert!(matches!(
        QuantFormat::from_ggml_type(14),
        Err(QuantError::UnsupportedFormat(_))
    ));
    assert!(matches!(
        "iq2_xxs".parse::<QuantFormat>(),
        Err(QuantError::UnsupportedFormat(_))
    ));
}

#[test]
fn from_bytes_matches_quantize() {
    let mut rng = StdRng::seed_from_u64(99);
    let w = random(&mut rng, 4 * 64);
    for format in QuantFormat::ALL {
        let bytes = ember_quant::quantize(format, &w).unwrap();
        let loaded = QuantizedMatrix::from_bytes(format, 4, 64, bytes).unwrap();
        let direct = QuantizedMatrix::quantize(format, &w, 4, 64).unwrap();
        assert_eq!(loaded.as_bytes(), direct.as_bytes());
    }
}
