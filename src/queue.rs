//! A blocking, multi-producer single-consumer FIFO, used as each
//! worker's work-item queue: a mutex-guarded `VecDeque` plus a
//! condition variable, rather than a lock-free structure — the queue
//! is never a contended bottleneck here since each worker has its own.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct SafeQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> SafeQueue<T> {
    pub fn new() -> Self {
        SafeQueue {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues an item and wakes one waiting consumer. Never blocks:
    /// the queue is unbounded, matching the reactor's requirement that
    /// handoffs to workers are non-blocking.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Blocks until an item is available, then dequeues it.
    pub fn wait_next(&self) -> T {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self
                .not_empty
                .wait(items)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl<T> Default for SafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
