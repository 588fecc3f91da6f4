//! Multi-head causal self-attention expressed as GEMMs.
//!
//! Per head: `scores = Q_h · K_hᵀ` over the cached window, causal mask and
//! scaled softmax in place, then `context_h = scores · V_h`. Keys and values
//! of the current step are appended to the cache before the window is read,
//! so prefill and decode run the same code.

use crate::api::error::{NnError, NnResult};
use crate::api::types::Workspace;
use crate::core::kv_cache::KvCache;
use crate::core::linear::Linear;
use ember_core::{softmax_in_place, MatMut, MatRef};
use rand::Rng;
use rayon::prelude::*;
use std::time::Instant;

/// Scale, causally mask and softmax `[rows, total]` scores in place.
///
/// Row `i` belongs to absolute position `start_pos + i`; keys after it are
/// set to −∞ and leave the softmax as exact zeros.
pub fn causal_softmax(scores: &mut [f32], total: usize, start_pos: usize, scale: f32) {
    for (i, row) in scores.chunks_exact_mut(total).enumerate() {
        let visible = (start_pos + i + 1).min(total);
        let (keep, masked) = row.split_at_mut(visible);
        for s in keep.iter_mut() {
            *s *= scale;
        }
        masked.fill(f32::NEG_INFINITY);
        softmax_in_place(row);
    }
}

pub struct MultiHeadAttention {
    pub q_proj: Linear,
    pub k_proj: Linear,
    pub v_proj: Linear,
    pub out_proj: Linear,
    d_model: usize,
    n_heads: usize,
    head_dim: usize,
    scale: f32,
}

impl MultiHeadAttention {
    pub fn new(d_model: usize, n_heads: usize, rng: &mut impl Rng) -> NnResult<Self> {
        Self::from_weights(
            Linear::new(d_model, d_model, true, rng),
            Linear::new(d_model, d_model, true, rng),
            Linear::new(d_model, d_model, true, rng),
            Linear::new(d_model, d_model, true, rng),
            n_heads,
        )
    }

    pub fn from_weights(q_proj: Linear, k_proj: Linear, v_proj: Linear, out_proj: Linear, n_heads: usize) -> NnResult<Self> {
        let d_model = q_proj.in_features();
        if n_heads == 0 || d_model % n_heads != 0 {
            return Err(NnError::InvalidConfig(format!(
                "d_model {} not divisible by n_heads {}",
                d_model, n_heads
            )));
        }
        for (name, proj) in [("q", &q_proj), ("k", &k_proj), ("v", &v_proj), ("out", &out_proj)] {
            if proj.in_features() != d_model || proj.out_features() != d_model {
                return Err(NnError::ShapeMismatch(format!(
                    "{}_proj is {}->{}, attention width is {}",
                    name,
                    proj.in_features(),
                    proj.out_features(),
                    d_model
                )));
            }
        }
        let head_dim = d_model / n_heads;
        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            d_model,
            n_heads,
            head_dim,
            scale: 1.0 / (head_dim as f32).sqrt(),
        })
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    pub fn n_heads(&self) -> usize {
        self.n_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn linears_mut(&mut self) -> [&mut Linear; 4] {
        [&mut self.q_proj, &mut self.k_proj, &mut self.v_proj, &mut self.out_proj]
    }

    /// Attend `x` (`[t, d_model]`, positions `start_pos..start_pos + t`) over
    /// the layer's cached history and write the projected result to `out`.
    pub fn forward_into(
        &self,
        ws: &Workspace<'_>,
        x: MatRef<'_>,
        cache: &mut KvCache,
        layer: usize,
        start_pos: usize,
        out: MatMut<'_>,
    ) -> NnResult<()> {
        let start = if log::log_enabled!(log::Level::Debug) {
            Some(Instant::now())
        } else {
            None
        };
        let t = x.rows();
        let (d, nh, hd) = (self.d_model, self.n_heads, self.head_dim);
        let total = start_pos + t;

        let mut q = ws.pool.scoped(&[t, d]);
        let mut k = ws.pool.scoped(&[t, d]);
        let mut v = ws.pool.scoped(&[t, d]);
        self.q_proj.forward_into(ws.gemm, x, q.mat_mut()?)?;
        self.k_proj.forward_into(ws.gemm, x, k.mat_mut()?)?;
        self.v_proj.forward_into(ws.gemm, x, v.mat_mut()?)?;

        let (k_mat, v_mat) = (k.mat()?, v.mat()?);
        for h in 0..nh {
            let cols = h * hd..(h + 1) * hd;
            cache.append(
                layer,
                h,
                k_mat.sub_cols(cols.start, cols.end),
                v_mat.sub_cols(cols.start, cols.end),
            )?;
        }

        // Single-token steps reserve the longest window so the buffer never regrows
        let reserve = if t == 1 { nh * cache.max_len() } else { 0 };
        let mut scores = ws.pool.scoped_reserved(&[nh, t, total], reserve);
        let mut heads = ws.pool.scoped(&[nh, t, hd]);

        let q_mat = q.mat()?;
        let cache = &*cache;
        let gemm = ws.gemm;
        let scale = self.scale;
        let attend = |h: usize, scores_h: &mut [f32], ctx_h: &mut [f32]| -> NnResult<()> {
            let (keys, values) = cache.read_window(layer, h)?;
            if keys.rows() != total {
                return Err(NnError::ShapeMismatch(format!(
                    "layer {} head {} caches {} positions, step expects {}",
                    layer,
                    h,
                    keys.rows(),
                    total
                )));
            }
            let q_h = q_mat.sub_cols(h * hd, (h + 1) * hd);
            gemm.matmul_transposed(q_h, keys, MatMut::new(&mut *scores_h, t, total)?)?;
            causal_softmax(scores_h, total, start_pos, scale);
            gemm.matmul(MatRef::new(scores_h, t, total)?, values, MatMut::new(ctx_h, t, hd)?)?;
            Ok(())
        };

        let (score_len, ctx_len) = (t * total, t * hd);
        if gemm.policy().fan_out_units(nh, score_len) {
            gemm.install(|| {
                scores
                    .as_mut_slice()
                    .par_chunks_mut(score_len)
                    .zip(heads.as_mut_slice().par_chunks_mut(ctx_len))
                    .enumerate()
                    .try_for_each(|(h, (s, c))| attend(h, s, c))
            })?;
        } else {
            for (h, (s, c)) in scores
                .as_mut_slice()
                .chunks_mut(score_len)
                .zip(heads.as_mut_slice().chunks_mut(ctx_len))
                .enumerate()
            {
                attend(h, s, c)?;
            }
        }

        // [nh, t, hd] -> [t, d]
        let mut merged = ws.pool.scoped(&[t, d]);
        {
            let dst = merged.as_mut_slice();
            for (h, head) in heads.as_slice().chunks_exact(ctx_len).enumerate() {
                for (i, row) in head.chunks_exact(hd).enumerate() {
                    dst[i * d + h * hd..i * d + (h + 1) * hd].copy_from_slice(row);
                }
            }
        }
        self.out_proj.forward_into(ws.gemm, merged.mat()?, out)?;

        if let Some(s) = start {
            log::debug!(
                "[attention] layer {} t={} window={} {:.3}ms",
                layer,
                t,
                total,
                s.elapsed().as_secs_f64() * 1000.0
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::CacheShape;
    use ember_core::{RuntimeConfig, Tensor};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    #[test]
    fn test_causal_softmax_masks_future_exactly() {
        let mut scores = vec![1.0f32; 3 * 3];
        causal_softmax(&mut scores, 3, 0, 0.5);
        assert_eq!(&scores[0..3], &[1.0, 0.0, 0.0]);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 0.0);
        assert_eq!(scores[5], 0.0);
        assert!((scores[3] - 0.5).abs() < 1e-6);
        for row in scores.chunks(3) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_causal_softmax_offset_rows() {
        // Two new queries at positions 4 and 5 over a 6-key window
        let mut scores: Vec<f32> = (0..12).map(|i| i as f32).collect();
        causal_softmax(&mut scores, 6, 4, 1.0);
        assert_eq!(scores[5], 0.0);
        assert!(scores[4] > 0.0);
        assert!(scores[6..].iter().all(|&p| p > 0.0));
    }

    fn attention_output(attn: &MultiHeadAttention, x: &Tensor, threads: usize, threshold: usize) -> Vec<f32> {
        let mut runtime = RuntimeConfig {
            num_threads: threads,
            ..RuntimeConfig::default()
        };
        runtime.gemm.parallel_threshold = threshold;
        let gemm = runtime.build_dispatcher().unwrap();
        let pool = runtime.build_pool();
        let ws = Workspace {
            gemm: &gemm,
            pool: &pool,
        };
        let t = x.shape()[0];
        let shape = CacheShape {
            n_layers: 1,
            n_heads: attn.n_heads(),
            head_dim: attn.head_dim(),
        };
        let mut cache = KvCache::new(shape, t, Arc::clone(&pool));
        let mut out = vec![0.0f32; x.numel()];
        attn.forward_into(
            &ws,
            x.mat().unwrap(),
            &mut cache,
            0,
            0,
            MatMut::new(&mut out, t, attn.d_model()).unwrap(),
        )
        .unwrap();
        assert_eq!(cache.current_len(), t);
        out
    }

    #[test]
    fn test_parallel_heads_match_serial() {
        let mut rng = StdRng::seed_from_u64(3);
        let attn = MultiHeadAttention::new(32, 4, &mut rng).unwrap();
        let x = Tensor::randn([6, 32], &mut rng);
        let serial = attention_output(&attn, &x, 0, 128);
        // threshold 2 => per-head tiles of 36 elements fan out
        let parallel = attention_output(&attn, &x, 2, 2);
        for (a, b) in serial.iter().zip(&parallel) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_rejects_mismatched_projection() {
        let mut rng = StdRng::seed_from_u64(4);
        let ok = Linear::new(16, 16, false, &mut rng);
        let bad = Linear::new(16, 8, false, &mut rng);
        assert!(MultiHeadAttention::from_weights(ok.clone(), ok.clone(), bad, ok.clone(), 4).is_err());
        assert!(MultiHeadAttention::from_weights(ok.clone(), ok.clone(), ok.clone(), ok, 3).is_err());
    }
}
