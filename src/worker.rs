//! A worker owns a set of sessions and drains a FIFO of work items
//! against them. Workers never share session state with each other;
//! the only thing they have in common is the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::cache::Cache;
use crate::queue::SafeQueue;
use crate::readiness::Readiness;
use crate::session::{Session, SessionId, SessionSignal};

/// One unit of work routed to a worker's FIFO.
pub enum WorkItem {
    NewSession(Session),
    Read { id: SessionId, bytes: Vec<u8> },
    SessionCtl { id: SessionId },
    Close { id: SessionId },
    Shutdown,
}

/// A worker thread and a handle to its queue.
pub struct Worker {
    queue: Arc<SafeQueue<WorkItem>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(cache: Arc<Cache>, readiness: Arc<Readiness>, connections: Arc<AtomicUsize>) -> Self {
        let queue = Arc::new(SafeQueue::new());
        let worker_queue = Arc::clone(&queue);
        let handle = thread::Builder::new()
            .name("mcached-worker".into())
            .spawn(move || worker_loop(&worker_queue, &cache, &readiness, &connections))
            .expect("failed to spawn worker thread");
        Worker {
            queue,
            handle: Some(handle),
        }
    }

    pub fn enqueue(&self, item: WorkItem) {
        self.queue.push(item);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.queue.push(WorkItem::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    queue: &SafeQueue<WorkItem>,
    cache: &Arc<Cache>,
    readiness: &Readiness,
    connections: &AtomicUsize,
) {
    let mut sessions: HashMap<SessionId, Session> = HashMap::new();
    loop {
        match queue.wait_next() {
            WorkItem::NewSession(session) => {
                sessions.insert(session.id(), session);
            }
            WorkItem::Read { id, bytes } => {
                dispatch(&mut sessions, readiness, connections, id, |session| {
                    session.process_chunk(&bytes, cache)
                });
            }
            WorkItem::SessionCtl { id } => {
                dispatch(&mut sessions, readiness, connections, id, |session| {
                    session.control()
                });
            }
            WorkItem::Close { id } => {
                close_session(&mut sessions, readiness, connections, id);
            }
            WorkItem::Shutdown => {
                for (id, session) in sessions.drain() {
                    let _ = readiness.remove(session.fd());
                    connections.fetch_sub(1, Ordering::AcqRel);
                    log::debug!("worker shutdown: dropping session {}", id.0);
                }
                return;
            }
        }
    }
}

/// Invokes `f` on the session for `id` if it is still registered,
/// closing it when the result says to. A session that was already
/// closed (e.g. a `Close` item raced ahead of a queued `Read`) is
/// silently ignored, matching the "session still registered" guard.
fn dispatch(
    sessions: &mut HashMap<SessionId, Session>,
    readiness: &Readiness,
    connections: &AtomicUsize,
    id: SessionId,
    f: impl FnOnce(&mut Session) -> SessionSignal,
) {
    let Some(session) = sessions.get_mut(&id) else {
        return;
    };
    match f(session) {
        SessionSignal::Continue | SessionSignal::PauseWrite => {}
        SessionSignal::Close => close_session(sessions, readiness, connections, id),
    }
}

fn close_session(
    sessions: &mut HashMap<SessionId, Session>,
    readiness: &Readiness,
    connections: &AtomicUsize,
    id: SessionId,
) {
    if let Some(session) = sessions.remove(&id) {
        let _ = readiness.remove(session.fd());
        connections.fetch_sub(1, Ordering::AcqRel);
    }
}
