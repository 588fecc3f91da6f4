//! Memory pooling for tensor allocations.
//!
//! TensorPool reuses f32 buffers across forward steps so steady-state decode
//! does not touch the allocator. Buffers come back through `give_back()` or
//! the [`Pooled`] guard and are handed out again by `rent()` on a best-fit basis.
//! The pool never clears what it hands out: every kernel overwrites its own output.

use crate::core::tensor::Tensor;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters describing pool effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Rents served from a cached buffer.
    pub hits: usize,
    /// Rents that had to allocate.
    pub misses: usize,
    /// Buffers currently cached.
    pub cached: usize,
}

/// A thread-safe pool of reusable f32 buffers.
pub struct TensorPool {
    buffers: Mutex<Vec<Vec<f32>>>,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl TensorPool {
    /// Create a new pool with the given maximum number of cached buffers.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Rent a tensor of the given shape. Contents are unspecified.
    pub fn rent(&self, shape: &[usize]) -> Tensor {
        self.rent_reserved(shape, 0)
    }

    /// Rent a tensor whose buffer can later grow to `reserve` elements in place.
    ///
    /// Decode steps use this for buffers whose length tracks the sequence length.
    pub fn rent_reserved(&self, shape: &[usize], reserve: usize) -> Tensor {
        let size: usize = shape.iter().product();
        let want = size.max(reserve);

        let reused = {
            let mut buffers = self.buffers.lock();
            // Find the smallest buffer that fits
            let mut best_idx = None;
            let mut best_cap = usize::MAX;
            for (i, buf) in buffers.iter().enumerate() {
                let cap = buf.capacity();
                if cap >= want && cap < best_cap {
                    best_idx = Some(i);
                    best_cap = cap;
                }
            }
            best_idx.map(|idx| buffers.swap_remove(idx))
        };

        let buf = match reused {
            Some(mut buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buf.resize(size, 0.0);
                buf
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let mut buf = Vec::with_capacity(want);
                buf.resize(size, 0.0);
                buf
            }
        };
        Tensor::from_pooled(buf, shape)
    }

    /// Rent a tensor wrapped in a guard that returns it on drop.
    pub fn scoped(&self, shape: &[usize]) -> Pooled<'_> {
        Pooled {
            pool: self,
            tensor: self.rent(shape),
        }
    }

    /// Scoped variant of [`rent_reserved`](Self::rent_reserved).
    pub fn scoped_reserved(&self, shape: &[usize], reserve: usize) -> Pooled<'_> {
        Pooled {
            pool: self,
            tensor: self.rent_reserved(shape, reserve),
        }
    }

    /// Return a tensor's buffer to the pool.
    ///
    /// Tensors that did not come from a pool are dropped, as are buffers
    /// arriving while the pool is at capacity.
    pub fn give_back(&self, tensor: Tensor) {
        if !tensor.is_pooled() {
            return;
        }
        let buf = tensor.into_vec();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.capacity {
            buffers.push(buf);
        }
    }

    /// Returns the number of buffers currently in the pool.
    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Returns true if the pool has no cached buffers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cached: self.len(),
        }
    }
}

/// A rented tensor that goes back to its pool when dropped.
pub struct Pooled<'p> {
    pool: &'p TensorPool,
    tensor: Tensor,
}

impl<'p> Pooled<'p> {
    /// Detach the tensor; the caller becomes responsible for returning it.
    pub fn into_inner(mut self) -> Tensor {
        // The empty placeholder is not pooled, so the guard's drop ignores it.
        std::mem::replace(&mut self.tensor, Tensor::zeros([0]))
    }
}

impl Deref for Pooled<'_> {
    type Target = Tensor;

    fn deref(&self) -> &Tensor {
        &self.tensor
    }
}

impl DerefMut for Pooled<'_> {
    fn deref_mut(&mut self) -> &mut Tensor {
        &mut self.tensor
    }
}

impl Drop for Pooled<'_> {
    fn drop(&mut self) {
        let tensor = std::mem::replace(&mut self.tensor, Tensor::zeros([0]));
        self.pool.give_back(tensor);
    }
}
