//! KV cache for incremental decoding.
//!
//! Keys and values of every layer live in one pooled buffer each, laid out
//! `[n_heads, max_len, head_dim]` so a head's history is a contiguous
//! `[len, head_dim]` matrix that attention reads without copying.

use crate::api::error::{NnError, NnResult};
use crate::api::types::CacheShape;
use ember_core::{MatRef, Tensor, TensorPool};
use std::sync::Arc;

pub struct KvCache {
    shape: CacheShape,
    max_len: usize,
    keys: Vec<Tensor>,
    values: Vec<Tensor>,
    /// Filled positions per (layer, head).
    lens: Vec<usize>,
    pool: Arc<TensorPool>,
}

impl KvCache {
    /// Rent key/value buffers for `max_len` positions from `pool`.
    pub fn new(shape: CacheShape, max_len: usize, pool: Arc<TensorPool>) -> Self {
        let buffer = [shape.n_heads, max_len, shape.head_dim];
        let keys = (0..shape.n_layers).map(|_| pool.rent(&buffer)).collect();
        let values = (0..shape.n_layers).map(|_| pool.rent(&buffer)).collect();
        Self {
            shape,
            max_len,
            keys,
            values,
            lens: vec![0; shape.n_layers * shape.n_heads],
            pool,
        }
    }

    pub fn shape(&self) -> CacheShape {
        self.shape
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Positions committed in every layer and head.
    pub fn current_len(&self) -> usize {
        self.lens.iter().copied().min().unwrap_or(0)
    }

    /// Bytes of key and value storage held by this cache.
    pub fn byte_size(&self) -> usize {
        2 * self.shape.n_layers
            * self.shape.n_heads
            * self.max_len
            * self.shape.head_dim
            * std::mem::size_of::<f32>()
    }

    pub fn validate_shape(&self, expected: &CacheShape) -> NnResult<()> {
        if self.shape != *expected {
            return Err(NnError::CacheShapeMismatch {
                expected: *expected,
                got: self.shape,
            });
        }
        Ok(())
    }

    fn slot(&self, layer: usize, head: usize) -> NnResult<usize> {
        if layer >= self.shape.n_layers || head >= self.shape.n_heads {
            return Err(NnError::ShapeMismatch(format!(
                "cache slot (layer {}, head {}) outside {}",
                layer, head, self.shape
            )));
        }
        Ok(layer * self.shape.n_heads + head)
    }

    /// Append rows of `head_dim` keys and values after the head's history.
    ///
    /// Nothing is written when the rows would not fit.
    pub fn append(&mut self, layer: usize, head: usize, keys: MatRef<'_>, values: MatRef<'_>) -> NnResult<()> {
        let idx = self.slot(layer, head)?;
        let hd = self.shape.head_dim;
        if keys.cols() != hd || values.cols() != hd || keys.rows() != values.rows() {
            return Err(NnError::ShapeMismatch(format!(
                "cache append expects matching [n, {}] keys and values, got {}x{} and {}x{}",
                hd,
                keys.rows(),
                keys.cols(),
                values.rows(),
                values.cols()
            )));
        }
        let len = self.lens[idx];
        let rows = keys.rows();
        if len + rows > self.max_len {
            return Err(NnError::CacheCapacityExceeded {
                requested: len + rows,
                capacity: self.max_len,
            });
        }

        let base = (head * self.max_len + len) * hd;
        let k_buf = self.keys[layer].as_mut_slice();
        for r in 0..rows {
            k_buf[base + r * hd..base + (r + 1) * hd].copy_from_slice(keys.row(r));
        }
        let v_buf = self.values[layer].as_mut_slice();
        for r in 0..rows {
            v_buf[base + r * hd..base + (r + 1) * hd].copy_from_slice(values.row(r));
        }
        self.lens[idx] = len + rows;
        Ok(())
    }

    /// `[len, head_dim]` views of a head's cached keys and values.
    pub fn read_window(&self, layer: usize, head: usize) -> NnResult<(MatRef<'_>, MatRef<'_>)> {
        let idx = self.slot(layer, head)?;
        let hd = self.shape.head_dim;
        let len = self.lens[idx];
        let start = head * self.max_len * hd;
        let end = start + len * hd;
        let keys = MatRef::new(&self.keys[layer].as_slice()[start..end], len, hd)?;
        let values = MatRef::new(&self.values[layer].as_slice()[start..end], len, hd)?;
        Ok((keys, values))
    }

    /// Drop every position at or beyond `len`.
    pub fn truncate(&mut self, len: usize) {
        for l in &mut self.lens {
            *l = (*l).min(len);
        }
    }

    pub fn reset(&mut self) {
        self.lens.fill(0);
    }
}

impl Drop for KvCache {
    fn drop(&mut self) {
        for t in self.keys.drain(..).chain(self.values.drain(..)) {
            self.pool.give_back(t);
        }
    }
}
