//! Steady-state decode must not touch the heap.
//!
//! A counting global allocator tallies allocations made by the test thread.

use ember_core::RuntimeConfig;
use ember_nn::{CacheBudget, KvCacheStore, ModelConfig, TransformerModel};
use ember_quant::QuantFormat;
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

struct CountingAlloc;

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

fn bump() {
    let _ = ALLOCATIONS.try_with(|c| c.set(c.get() + 1));
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        bump();
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        bump();
        System.alloc_zeroed(layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        bump();
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn allocations() -> usize {
    ALLOCATIONS.with(|c| c.get())
}

fn config() -> ModelConfig {
    ModelConfig {
        vocab_size: 64,
        d_model: 64,
        n_layers: 2,
        n_heads: 4,
        hidden_dim: 128,
        max_seq_len: 32,
        norm_eps: 1e-5,
    }
}

fn decode_steps_allocate(model: &TransformerModel) -> usize {
    let store = KvCacheStore::new(CacheBudget::default());
    let session = store.open_session();
    let out = model.forward_session(&store, session, &[1, 2, 3, 4]).unwrap();
    model.recycle(out.logits);

    let mut token = 5u32;
    for _ in 0..4 {
        let out = model.decode(&store, session, token).unwrap();
        model.recycle(out.logits);
        token += 1;
    }

    let before = allocations();
    for _ in 0..6 {
        let out = model.decode(&store, session, token).unwrap();
        model.recycle(out.logits);
        token += 1;
    }
    let made = allocations() - before;
    assert_eq!(store.current_length(session), 14);
    made
}

#[test]
fn dense_decode_is_allocation_free() {
    let model = TransformerModel::random(config(), 5, &RuntimeConfig::default()).unwrap();
    assert_eq!(decode_steps_allocate(&model), 0);
}

#[test]
fn quantized_decode_is_allocation_free() {
    let mut model = TransformerModel::random(config(), 5, &RuntimeConfig::default()).unwrap();
    model.quantize_weights(QuantFormat::Q4_0).unwrap();
    assert_eq!(decode_steps_allocate(&model), 0);
}
