//! GPT-style decoder: token + learned position embeddings, pre-norm blocks,
//! final LayerNorm and LM head.
//!
//! Session steps reuse the longest cached prefix of the requested sequence
//! and compute only the remaining positions; extending the history by exactly
//! one token is a decode step.

use crate::api::error::{NnError, NnResult};
use crate::api::types::{CacheShape, ForwardOutput, SessionHandle, StepKind, Workspace};
use crate::core::config::ModelConfig;
use crate::core::kv_cache::KvCache;
use crate::core::layer_norm::LayerNorm;
use crate::core::linear::Linear;
use crate::core::session::KvCacheStore;
use crate::core::transformer_block::TransformerBlock;
use ember_core::{GemmDispatcher, RuntimeConfig, Tensor, TensorPool};
use ember_quant::QuantFormat;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

const EMBEDDING_STD: f32 = 0.02;

pub struct TransformerModel {
    config: ModelConfig,
    token_embedding: Tensor,
    position_embedding: Tensor,
    blocks: Vec<TransformerBlock>,
    final_norm: LayerNorm,
    lm_head: Linear,
    gemm: GemmDispatcher,
    pool: Arc<TensorPool>,
}

fn expect_shape(name: &str, tensor: &Tensor, expected: [usize; 2]) -> NnResult<()> {
    if tensor.shape() != expected {
        return Err(NnError::ShapeMismatch(format!(
            "{} is {:?}, expected {:?}",
            name,
            tensor.shape(),
            expected
        )));
    }
    Ok(())
}

impl TransformerModel {
    /// Assemble a model from loaded weights, validating every shape against `config`.
    pub fn from_parts(
        config: ModelConfig,
        token_embedding: Tensor,
        position_embedding: Tensor,
        blocks: Vec<TransformerBlock>,
        final_norm: LayerNorm,
        lm_head: Linear,
        runtime: &RuntimeConfig,
    ) -> NnResult<Self> {
        config.validate()?;
        let d = config.d_model;
        expect_shape("token_embedding", &token_embedding, [config.vocab_size, d])?;
        expect_shape("position_embedding", &position_embedding, [config.max_seq_len, d])?;
        if blocks.len() != config.n_layers {
            return Err(NnError::ShapeMismatch(format!(
                "{} blocks for {} layers",
                blocks.len(),
                config.n_layers
            )));
        }
        for block in &blocks {
            block.validate(&config)?;
        }
        if final_norm.dim() != d {
            return Err(NnError::ShapeMismatch(format!(
                "final norm width {} != d_model {}",
                final_norm.dim(),
                d
            )));
        }
        if lm_head.in_features() != d || lm_head.out_features() != config.vocab_size {
            return Err(NnError::ShapeMismatch(format!(
                "lm_head is {}->{}, expected {}->{}",
                lm_head.in_features(),
                lm_head.out_features(),
                d,
                config.vocab_size
            )));
        }

        let gemm = runtime.build_dispatcher()?;
        let pool = runtime.build_pool();
        Ok(Self {
            config,
            token_embedding,
            position_embedding,
            blocks,
            final_norm,
            lm_head,
            gemm,
            pool,
        })
    }

    /// Seeded synthetic model.
    pub fn random(config: ModelConfig, seed: u64, runtime: &RuntimeConfig) -> NnResult<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let d = config.d_model;
        let token_embedding = Tensor::randn_scaled([config.vocab_size, d], EMBEDDING_STD, &mut rng);
        let position_embedding = Tensor::randn_scaled([config.max_seq_len, d], EMBEDDING_STD, &mut rng);
        let blocks = (0..config.n_layers)
            .map(|_| TransformerBlock::new(&config, &mut rng))
            .collect::<NnResult<Vec<_>>>()?;
        let final_norm = LayerNorm::new(d, config.norm_eps);
        let lm_head = Linear::new(d, config.vocab_size, false, &mut rng);
        Self::from_parts(
            config,
            token_embedding,
            position_embedding,
            blocks,
            final_norm,
            lm_head,
            runtime,
        )
    }

    /// Convert every block-aligned linear layer to `format`. Returns how many
    /// layers were converted.
    pub fn quantize_weights(&mut self, format: QuantFormat) -> NnResult<usize> {
        let mut converted = 0;
        for block in &mut self.blocks {
            for linear in block.linears_mut() {
                converted += usize::from(linear.quantize(format)?);
            }
        }
        converted += usize::from(self.lm_head.quantize(format)?);
        log::info!("[model] quantized {} linear layers to {}", converted, format);
        Ok(converted)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn cache_shape(&self) -> CacheShape {
        self.config.cache_shape()
    }

    pub fn gemm(&self) -> &GemmDispatcher {
        &self.gemm
    }

    pub fn pool(&self) -> &Arc<TensorPool> {
        &self.pool
    }

    pub fn blocks(&self) -> &[TransformerBlock] {
        &self.blocks
    }

    pub fn parameter_count(&self) -> usize {
        let d = self.config.d_model;
        let per_block: usize = self
            .blocks
            .iter()
            .map(|b| {
                let a = &b.attention;
                [&a.q_proj, &a.k_proj, &a.v_proj, &a.out_proj]
                    .iter()
                    .map(|l| l.parameter_count())
                    .sum::<usize>()
                    + b.feed_forward.up_proj.parameter_count()
                    + b.feed_forward.down_proj.parameter_count()
                    + 4 * d
            })
            .sum();
        self.token_embedding.numel()
            + self.position_embedding.numel()
            + per_block
            + 2 * d
            + self.lm_head.parameter_count()
    }

    /// Logits for `tokens`.
    ///
    /// Without a session every position is computed from scratch. With one,
    /// `tokens` is the whole conversation and only positions beyond the
    /// reusable cached prefix are computed and returned.
    pub fn forward(&self, tokens: &[u32], session: Option<(&KvCacheStore, SessionHandle)>) -> NnResult<Tensor> {
        match session {
            Some((store, handle)) => Ok(self.forward_session(store, handle, tokens)?.logits),
            None => self.forward_full(tokens),
        }
    }

    /// Stateless forward over every position: `[tokens.len(), vocab_size]`.
    pub fn forward_full(&self, tokens: &[u32]) -> NnResult<Tensor> {
        self.check_tokens(tokens)?;
        self.check_capacity(tokens.len())?;
        let mut cache = KvCache::new(self.cache_shape(), tokens.len(), Arc::clone(&self.pool));
        self.run(tokens, 0, &mut cache)
    }

    /// Run `tokens` (the full sequence) against a session's cache.
    pub fn forward_session(
        &self,
        store: &KvCacheStore,
        handle: SessionHandle,
        tokens: &[u32],
    ) -> NnResult<ForwardOutput> {
        self.check_tokens(tokens)?;
        self.check_capacity(tokens.len())?;

        let slot = store.checkout(handle);
        let mut guard = slot.lock();
        let state = &mut *guard;
        let cache = self.session_cache(&mut state.cache, &mut state.history)?;

        let lcp = state
            .history
            .iter()
            .zip(tokens)
            .take_while(|(a, b)| a == b)
            .count();
        // At least one position is always computed to produce logits
        let reused = lcp.min(tokens.len() - 1);
        cache.truncate(reused);
        state.history.truncate(reused);

        let new_tokens = &tokens[reused..];
        let kind = if reused > 0 && new_tokens.len() == 1 {
            StepKind::Decode
        } else {
            StepKind::Prefill
        };
        log::debug!(
            "[model] session {} {}: reused {} of {} positions",
            handle,
            kind,
            reused,
            tokens.len()
        );

        let logits = Self::extend(cache, &mut state.history, new_tokens, reused, |cache| {
            self.run(new_tokens, reused, cache)
        })?;
        let (history_len, bytes) = (state.history.len(), cache.byte_size());
        drop(guard);
        store.commit(handle, history_len, bytes);

        Ok(ForwardOutput {
            logits,
            kind,
            reused,
            computed: new_tokens.len(),
        })
    }

    /// Append one token to a session that already holds context.
    ///
    /// Fails with [`NnError::CacheMiss`] when the session has nothing cached,
    /// so the caller can fall back to a prefill.
    pub fn decode(&self, store: &KvCacheStore, handle: SessionHandle, token: u32) -> NnResult<ForwardOutput> {
        let tokens = std::slice::from_ref(&token);
        self.check_tokens(tokens)?;

        let slot = store.checkout(handle);
        let mut guard = slot.lock();
        let state = &mut *guard;
        let cache = match state.cache.as_mut() {
            Some(cache) if cache.current_len() > 0 => cache,
            _ => return Err(NnError::CacheMiss(handle)),
        };
        cache.validate_shape(&self.config.cache_shape())?;

        let start_pos = state.history.len();
        self.check_capacity(start_pos + 1)?;
        let logits = Self::extend(cache, &mut state.history, tokens, start_pos, |cache| {
            self.run(tokens, start_pos, cache)
        })?;
        let (history_len, bytes) = (state.history.len(), cache.byte_size());
        drop(guard);
        store.commit(handle, history_len, bytes);

        Ok(ForwardOutput {
            logits,
            kind: StepKind::Decode,
            reused: start_pos,
            computed: 1,
        })
    }

    /// Return a logits tensor's buffer to the model's pool.
    pub fn recycle(&self, tensor: Tensor) {
        self.pool.give_back(tensor);
    }

    /// The session's cache, allocated on first use.
    fn session_cache<'s>(&self, slot: &'s mut Option<KvCache>, history: &mut Vec<u32>) -> NnResult<&'s mut KvCache> {
        let shape = self.config.cache_shape();
        let max_len = self.config.max_seq_len;
        if slot.is_none() {
            history.clear();
            history.reserve(max_len);
        }
        let cache = slot.get_or_insert_with(|| KvCache::new(shape, max_len, Arc::clone(&self.pool)));
        cache.validate_shape(&shape)?;
        Ok(cache)
    }

    /// Run a step and keep cache and history consistent: on success the new
    /// tokens join the history, on failure the cache is rolled back.
    fn extend<F>(cache: &mut KvCache, history: &mut Vec<u32>, new_tokens: &[u32], start_pos: usize, step: F) -> NnResult<Tensor>
    where
        F: FnOnce(&mut KvCache) -> NnResult<Tensor>,
    {
        match step(cache) {
            Ok(logits) => {
                history.extend_from_slice(new_tokens);
                Ok(logits)
            }
            Err(e) => {
                cache.truncate(start_pos);
                Err(e)
            }
        }
    }

    fn check_tokens(&self, tokens: &[u32]) -> NnResult<()> {
        if tokens.is_empty() {
            return Err(NnError::EmptyInput);
        }
        let vocab_size = self.config.vocab_size;
        if let Some(&token) = tokens.iter().find(|&&t| t as usize >= vocab_size) {
            return Err(NnError::TokenOutOfRange { token, vocab_size });
        }
        Ok(())
    }

    fn check_capacity(&self, positions: usize) -> NnResult<()> {
        if positions > self.config.max_seq_len {
            return Err(NnError::CacheCapacityExceeded {
                requested: positions,
                capacity: self.config.max_seq_len,
            });
        }
        Ok(())
    }

    /// Compute positions `start_pos..start_pos + tokens.len()`, extending `cache`.
    fn run(&self, tokens: &[u32], start_pos: usize, cache: &mut KvCache) -> NnResult<Tensor> {
        let t = tokens.len();
        let d = self.config.d_model;
        if start_pos + t > cache.max_len() {
            return Err(NnError::CacheCapacityExceeded {
                requested: start_pos + t,
                capacity: cache.max_len(),
            });
        }
        if cache.current_len() != start_pos {
            return Err(NnError::ShapeMismatch(format!(
                "cache holds {} positions, step starts at {}",
                cache.current_len(),
                start_pos
            )));
        }

        let ws = Workspace {
            gemm: &self.gemm,
            pool: &self.pool,
        };
        let mut x = self.pool.scoped(&[t, d]);
        {
            let tok = self.token_embedding.as_slice();
            let pos = self.position_embedding.as_slice();
            for (i, (row, &token)) in x.as_mut_slice().chunks_exact_mut(d).zip(tokens).enumerate() {
                let te = &tok[token as usize * d..(token as usize + 1) * d];
                let p = start_pos + i;
                let pe = &pos[p * d..(p + 1) * d];
                for ((o, a), b) in row.iter_mut().zip(te).zip(pe) {
                    *o = a + b;
                }
            }
        }

        for (layer, block) in self.blocks.iter().enumerate() {
            block.forward(&ws, &mut x, cache, layer, start_pos)?;
        }

        let mut normed = self.pool.scoped(&[t, d]);
        self.final_norm.forward_into(x.mat()?, normed.mat_mut()?)?;
        let mut logits = self.pool.scoped(&[t, self.config.vocab_size]);
        self.lm_head.forward_into(&self.gemm, normed.mat()?, logits.mat_mut()?)?;
        Ok(logits.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> ModelConfig {
        ModelConfig {
            vocab_size: 16,
            d_model: 16,
            n_layers: 1,
            n_heads: 2,
            hidden_dim: 32,
            max_seq_len: 8,
            norm_eps: 1e-5,
        }
    }

    #[test]
    fn test_forward_full_shape() {
        let model = TransformerModel::random(tiny(), 1, &RuntimeConfig::default()).unwrap();
        let logits = model.forward(&[1, 2, 3], None).unwrap();
        assert_eq!(logits.shape(), &[3, 16]);
        assert!(logits.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_input_validation() {
        let model = TransformerModel::random(tiny(), 1, &RuntimeConfig::default()).unwrap();
        assert!(matches!(model.forward_full(&[]), Err(NnError::EmptyInput)));
        assert!(matches!(
            model.forward_full(&[1, 16]),
            Err(NnError::TokenOutOfRange { token: 16, .. })
        ));
        let err = model.forward_full(&[0; 9]).unwrap_err();
        assert!(err.is_capacity_exceeded());
    }

    #[test]
    fn test_from_parts_rejects_bad_shapes() {
        let config = tiny();
        let mut rng = StdRng::seed_from_u64(0);
        let blocks = || vec![TransformerBlock::new(&tiny(), &mut StdRng::seed_from_u64(1)).unwrap()];
        let runtime = RuntimeConfig::default();

        let err = TransformerModel::from_parts(
            config.clone(),
            Tensor::zeros([15, 16]),
            Tensor::zeros([8, 16]),
            blocks(),
            LayerNorm::new(16, 1e-5),
            Linear::new(16, 16, false, &mut rng),
            &runtime,
        );
        assert!(matches!(err, Err(NnError::ShapeMismatch(_))));

        let err = TransformerModel::from_parts(
            config.clone(),
            Tensor::zeros([16, 16]),
            Tensor::zeros([8, 16]),
            blocks(),
            LayerNorm::new(16, 1e-5),
            Linear::new(16, 12, false, &mut rng),
            &runtime,
        );
        assert!(matches!(err, Err(NnError::ShapeMismatch(_))));

        let err = TransformerModel::from_parts(
            config,
            Tensor::zeros([16, 16]),
            Tensor::zeros([8, 16]),
            Vec::new(),
            LayerNorm::new(16, 1e-5),
            Linear::new(16, 16, false, &mut rng),
            &runtime,
        );
        assert!(matches!(err, Err(NnError::ShapeMismatch(_))));
    }

    #[test]
    fn test_decode_without_context_is_cache_miss() {
        let model = TransformerModel::random(tiny(), 1, &RuntimeConfig::default()).unwrap();
        let store = KvCacheStore::default();
        let handle = store.open_session();
        assert!(matches!(
            model.decode(&store, handle, 3),
            Err(NnError::CacheMiss(h)) if h == handle
        ));
    }

    #[test]
    fn test_parameter_count() {
        let model = TransformerModel::random(tiny(), 1, &RuntimeConfig::default()).unwrap();
        // embeddings 16*16 + 8*16, attention 4*(16*16+16), ffn 16*32+32 + 32*16+16,
        // block norms 4*16, final norm 2*16, lm_head 16*16
        let expected = 256 + 128 + 4 * 272 + 544 + 528 + 64 + 32 + 256;
        assert_eq!(model.parameter_count(), expected);
    }
}
