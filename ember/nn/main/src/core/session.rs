//! Session-keyed KV caches with LRU eviction.
//!
//! The store maps each [`SessionHandle`] to the session's cache and token
//! history. Each session sits behind its own mutex, so steps of different
//! sessions run concurrently while a single session has one writer at a time.
//! The store lock is never held while a session lock is being acquired.

use crate::api::types::{CacheBudget, SessionHandle, StoreStats};
use crate::core::kv_cache::KvCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cached context of one session. The cache is created on the first step.
#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) cache: Option<KvCache>,
    /// Tokens whose keys and values are in `cache`, in order.
    pub(crate) history: Vec<u32>,
}

struct SessionSlot {
    state: Arc<Mutex<SessionState>>,
    last_used: u64,
    tokens: usize,
    bytes: usize,
}

impl SessionSlot {
    fn new(clock: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::default())),
            last_used: clock,
            tokens: 0,
            bytes: 0,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<SessionHandle, SessionSlot>,
    clock: u64,
    evictions: usize,
}

impl StoreInner {
    fn totals(&self) -> (usize, usize) {
        self.sessions
            .values()
            .fold((0, 0), |(t, b), s| (t + s.tokens, b + s.bytes))
    }

    /// Least recently used session other than `keep`.
    fn lru_victim(&self, keep: SessionHandle) -> Option<SessionHandle> {
        self.sessions
            .iter()
            .filter(|(h, _)| **h != keep)
            .min_by_key(|(_, s)| s.last_used)
            .map(|(h, _)| *h)
    }
}

/// Thread-safe store of per-session KV caches.
pub struct KvCacheStore {
    inner: Mutex<StoreInner>,
    next_id: AtomicU64,
    budget: CacheBudget,
}

impl KvCacheStore {
    pub fn new(budget: CacheBudget) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            next_id: AtomicU64::new(1),
            budget,
        }
    }

    pub fn budget(&self) -> CacheBudget {
        self.budget
    }

    /// Register a new, empty session.
    pub fn open_session(&self) -> SessionHandle {
        let handle = SessionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        inner.sessions.insert(handle, SessionSlot::new(clock));
        log::debug!("[kv-store] opened session {}", handle);
        handle
    }

    /// The session's state, creating it if the handle is unknown, and mark
    /// it most recently used.
    pub(crate) fn checkout(&self, handle: SessionHandle) -> Arc<Mutex<SessionState>> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        let slot = inner.sessions.entry(handle).or_insert_with(|| {
            log::debug!("[kv-store] created session {} on first use", handle);
            SessionSlot::new(clock)
        });
        slot.last_used = clock;
        Arc::clone(&slot.state)
    }

    /// Record a session's footprint after a step and evict least recently
    /// used sessions until the budget holds. `handle` itself is never evicted.
    pub(crate) fn commit(&self, handle: SessionHandle, tokens: usize, bytes: usize) {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(&handle) {
            Some(slot) => {
                slot.tokens = tokens;
                slot.bytes = bytes;
            }
            // Evicted while the step ran; its cache goes away with the last reference
            None => return,
        }
        loop {
            let (total_tokens, total_bytes) = inner.totals();
            if total_tokens <= self.budget.max_tokens && total_bytes <= self.budget.max_bytes {
                break;
            }
            let Some(victim) = inner.lru_victim(handle) else {
                break;
            };
            if let Some(slot) = inner.sessions.remove(&victim) {
                inner.evictions += 1;
                log::debug!(
                    "[kv-store] evicted session {} ({} tokens, {} bytes); totals {} tokens, {} bytes",
                    victim,
                    slot.tokens,
                    slot.bytes,
                    total_tokens,
                    total_bytes
                );
            }
        }
    }

    fn state_of(&self, handle: SessionHandle) -> Option<Arc<Mutex<SessionState>>> {
        self.inner
            .lock()
            .sessions
            .get(&handle)
            .map(|slot| Arc::clone(&slot.state))
    }

    /// Forget a session's cached positions but keep its buffers for reuse.
    pub fn reset(&self, handle: SessionHandle) {
        let Some(state) = self.state_of(handle) else {
            return;
        };
        let bytes = {
            let mut state = state.lock();
            state.history.clear();
            match state.cache.as_mut() {
                Some(cache) => {
                    cache.reset();
                    cache.byte_size()
                }
                None => 0,
            }
        };
        if let Some(slot) = self.inner.lock().sessions.get_mut(&handle) {
            slot.tokens = 0;
            slot.bytes = bytes;
        }
    }

    /// Drop a session and release its cache. Returns false for unknown handles.
    pub fn evict(&self, handle: SessionHandle) -> bool {
        let removed = self.inner.lock().sessions.remove(&handle);
        if removed.is_some() {
            log::debug!("[kv-store] evicted session {} on request", handle);
        }
        removed.is_some()
    }

    /// Cached positions of a session; 0 for unknown handles.
    pub fn current_length(&self, handle: SessionHandle) -> usize {
        self.state_of(handle)
            .map_or(0, |state| state.lock().history.len())
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.inner.lock().sessions.contains_key(&handle)
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        let (tokens, bytes) = inner.totals();
        StoreStats {
            sessions: inner.sessions.len(),
            tokens,
            bytes,
            evictions: inner.evictions,
        }
    }
}

impl Default for KvCacheStore {
    fn default() -> Self {
        Self::new(CacheBudget::default())
    }
}
