//! The LRU cache engine: hash-indexed, size-bounded, with optional CAS
//! and optional thread-safety.
//!
//! Two modes share one [`CacheSegment`] implementation:
//!
//! - [`Cache::Local`] — a [`RefCell`]-guarded segment with no locking,
//!   used when the server runs in single-worker mode (reactor and
//!   worker are the same thread, so no synchronization is needed). The
//!   `RefCell` is `!Sync`, which means an `Arc<Cache>` in `Local` mode
//!   cannot cross a thread boundary — the type system enforces the
//!   single-threaded contract rather than a runtime check.
//! - [`Cache::Shared`] — a single `parking_lot::Mutex`-guarded segment,
//!   used in multi-worker mode. Deliberately *unsegmented*: sharding the
//!   segment across multiple locks would only give a per-shard
//!   approximate LRU order, not the single global order this cache's
//!   contract requires.

mod item;
mod segment;

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;

pub use item::Item;
pub use segment::{RemoveOutcome, SetOutcome};
use segment::CacheSegment;

use crate::error::CacheError;

/// The cache engine, in either thread-safety mode.
pub enum Cache {
    Local(RefCell<CacheSegment>),
    Shared(Mutex<CacheSegment>),
}

impl Cache {
    /// Builds a single-worker (unsynchronized) cache with the given
    /// byte budget.
    pub fn local(max_bytes: u64) -> Self {
        Cache::Local(RefCell::new(CacheSegment::new(max_bytes)))
    }

    /// Builds a multi-worker (mutex-guarded) cache with the given byte
    /// budget.
    pub fn shared(max_bytes: u64) -> Self {
        Cache::Shared(Mutex::new(CacheSegment::new(max_bytes)))
    }

    /// Unconditional insert-or-replace.
    pub fn set(&self, item: Arc<Item>) -> Result<(), CacheError> {
        match self {
            Cache::Local(seg) => seg.borrow_mut().set(item),
            Cache::Shared(seg) => seg.lock().set(item),
        }
    }

    /// Compare-and-swap store.
    pub fn cas(&self, item: Arc<Item>, token: u64) -> Result<SetOutcome, CacheError> {
        match self {
            Cache::Local(seg) => seg.borrow_mut().cas(item, token),
            Cache::Shared(seg) => seg.lock().cas(item, token),
        }
    }

    /// Deletes the entry for `key`, optionally gated by a CAS token.
    pub fn remove(&self, key: &[u8], token: u64) -> RemoveOutcome {
        match self {
            Cache::Local(seg) => seg.borrow_mut().remove(key, token),
            Cache::Shared(seg) => seg.lock().remove(key, token),
        }
    }

    /// Looks up `key`, returning a reference-counted handle on the
    /// item. The handle remains valid for the caller to read even after
    /// this call returns and the internal lock (if any) is released,
    /// since the cache and the caller now share ownership of the same
    /// `Arc`.
    pub fn get(&self, key: &[u8]) -> Option<Arc<Item>> {
        match self {
            Cache::Local(seg) => seg.borrow_mut().get(key),
            Cache::Shared(seg) => seg.lock().get(key),
        }
    }

    /// Copies the value bytes for `key` into `out`, returning whether
    /// the key was present.
    pub fn get_value(&self, key: &[u8], out: &mut Vec<u8>) -> bool {
        match self {
            Cache::Local(seg) => seg.borrow_mut().get_value(key, out),
            Cache::Shared(seg) => seg.lock().get_value(key, out),
        }
    }

    /// Current number of bytes charged against the budget.
    pub fn used_bytes(&self) -> u64 {
        match self {
            Cache::Local(seg) => seg.borrow().used_bytes(),
            Cache::Shared(seg) => seg.lock().used_bytes(),
        }
    }

    /// The configured byte budget.
    pub fn max_bytes(&self) -> u64 {
        match self {
            Cache::Local(seg) => seg.borrow().max_bytes(),
            Cache::Shared(seg) => seg.lock().max_bytes(),
        }
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        match self {
            Cache::Local(seg) => seg.borrow().len(),
            Cache::Shared(seg) => seg.lock().len(),
        }
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            Cache::Local(_) => "Local",
            Cache::Shared(_) => "Shared",
        };
        f.debug_struct("Cache")
            .field("mode", &mode)
            .field("len", &self.len())
            .field("used_bytes", &self.used_bytes())
            .field("max_bytes", &self.max_bytes())
            .finish()
    }
}
