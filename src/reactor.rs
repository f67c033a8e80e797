//! The reactor: a single thread owning the listening socket, the
//! readiness set, the control pipe's read end, and a round-robin
//! selector over workers. It never blocks except inside `wait()`.

use std::collections::HashMap;
use std::io::Read;
use std::net::TcpListener;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cache::Cache;
use crate::config::{Settings, READ_CHUNK_SIZE};
use crate::error::StartupError;
use crate::pipe::{self, ControlPipeReader, ControlPipeWriter};
use crate::readiness::{ReadyFlags, Readiness};
use crate::round_robin::RoundRobin;
use crate::session::{Session, SessionId, SessionSignal};
use crate::socket;
use crate::worker::{WorkItem, Worker};

const LISTENER_TAG: u64 = u64::MAX;
const CTL_TAG: u64 = u64::MAX - 1;

/// Where sessions live and how work items reach them: either a real
/// worker pool (multi-threaded dispatch) or a session table owned
/// directly by the reactor thread (single-worker in-line dispatch).
/// Behavior is identical in both modes; only the handoff mechanism
/// differs, per the single-vs-multi-worker design note.
enum Dispatch {
    Inline {
        sessions: HashMap<SessionId, Session>,
    },
    Pool {
        workers: Vec<Worker>,
        round_robin: RoundRobin,
        owner: HashMap<SessionId, usize>,
    },
}

pub struct Reactor {
    listener: TcpListener,
    readiness: Arc<Readiness>,
    ctl_reader: ControlPipeReader,
    ctl_writer: ControlPipeWriter,
    dispatch: Dispatch,
    cache: Arc<Cache>,
    fd_owner: HashMap<RawFd, SessionId>,
    connections: Arc<AtomicUsize>,
    max_connections: usize,
    next_session_id: u64,
}

impl Reactor {
    pub fn new(settings: &Settings) -> Result<Self, StartupError> {
        let listener = socket::bind(settings.listen_addr, settings.port)?;
        let readiness = Arc::new(Readiness::create()?);
        let (ctl_reader, ctl_writer) = pipe::control_pipe()?;

        readiness.add(
            listener_fd(&listener),
            LISTENER_TAG,
            ReadyFlags::EPOLLIN,
        )?;
        readiness.add(ctl_reader.raw_fd(), CTL_TAG, ReadyFlags::EPOLLIN)?;

        let cache = Arc::new(if settings.threads <= 1 {
            Cache::local(settings.cache_bytes)
        } else {
            Cache::shared(settings.cache_bytes)
        });

        let connections = Arc::new(AtomicUsize::new(0));

        let dispatch = if settings.threads <= 1 {
            Dispatch::Inline {
                sessions: HashMap::new(),
            }
        } else {
            let workers = (0..settings.threads)
                .map(|_| Worker::spawn(Arc::clone(&cache), Arc::clone(&readiness), Arc::clone(&connections)))
                .collect::<Vec<_>>();
            Dispatch::Pool {
                round_robin: RoundRobin::new(workers.len()),
                workers,
                owner: HashMap::new(),
            }
        };

        Ok(Reactor {
            listener,
            readiness,
            ctl_reader,
            ctl_writer,
            dispatch,
            cache,
            fd_owner: HashMap::new(),
            connections,
            max_connections: settings.max_connections,
            next_session_id: 0,
        })
    }

    /// The address actually bound, including the kernel-assigned port
    /// when constructed with port `0`. Used by tests to connect to a
    /// server started on an ephemeral port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs forever (until externally terminated), per the server's
    /// no-graceful-shutdown contract.
    pub fn run(mut self) -> Result<(), StartupError> {
        loop {
            let events = self.readiness.wait().map_err(StartupError::Epoll)?;
            for event in events {
                match event.user_data {
                    LISTENER_TAG => self.handle_accept(),
                    CTL_TAG => self.handle_control_pipe(),
                    fd_bits => self.handle_session_event(fd_bits as i32 as RawFd, event.flags),
                }
            }
        }
    }

    fn handle_accept(&mut self) {
        let accepted = match socket::accept_all(&self.listener) {
            Ok(streams) => streams,
            Err(e) => {
                log::warn!("accept failed: {e}");
                return;
            }
        };
        for stream in accepted {
            if self.connections.load(Ordering::Acquire) >= self.max_connections {
                log::warn!("connection cap reached, rejecting new connection");
                drop(stream); // closes the fd without registering it
                continue;
            }
            let fd = socket::raw_fd(&stream);
            let id = SessionId(self.next_session_id);
            self.next_session_id += 1;

            let session = Session::new(id, stream, self.ctl_writer.clone());
            if let Err(e) = self.readiness.add(
                fd,
                fd as u64,
                ReadyFlags::EPOLLIN | ReadyFlags::EPOLLERR | ReadyFlags::EPOLLHUP,
            ) {
                log::warn!("failed to register new session fd: {e}");
                continue;
            }
            self.fd_owner.insert(fd, id);
            self.connections.fetch_add(1, Ordering::AcqRel);

            match &mut self.dispatch {
                Dispatch::Inline { sessions } => {
                    sessions.insert(id, session);
                }
                Dispatch::Pool {
                    workers,
                    round_robin,
                    owner,
                } => {
                    let worker_idx = round_robin.pick();
                    owner.insert(id, worker_idx);
                    workers[worker_idx].enqueue(WorkItem::NewSession(session));
                }
            }
        }
    }

    fn handle_control_pipe(&mut self) {
        let events = match self.ctl_reader.drain() {
            Ok(events) => events,
            Err(e) => {
                log::warn!("control pipe read failed: {e}");
                return;
            }
        };
        for event in events {
            let id = SessionId(event.session_id);
            self.route(id, WorkItem::SessionCtl { id });
        }
    }

    fn handle_session_event(&mut self, fd: RawFd, flags: ReadyFlags) {
        let Some(&id) = self.fd_owner.get(&fd) else {
            return;
        };

        if flags.intersects(ReadyFlags::EPOLLERR | ReadyFlags::EPOLLHUP) {
            self.close_fd(fd, id);
            return;
        }

        if !flags.contains(ReadyFlags::EPOLLIN) {
            return;
        }

        loop {
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let stream_result = self.read_session_fd(fd, &mut chunk);
            match stream_result {
                Ok(0) => {
                    self.close_fd(fd, id);
                    return;
                }
                Ok(n) => {
                    self.route(id, WorkItem::Read {
                        id,
                        bytes: chunk[..n].to_vec(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_) => {
                    self.close_fd(fd, id);
                    return;
                }
            }
        }
    }

    /// Reads directly from the session's socket. The reactor never
    /// holds the session itself (it may live on a worker thread), so it
    /// reads through the raw fd rather than borrowing the `Session`.
    fn read_session_fd(&self, fd: RawFd, buf: &mut [u8]) -> std::io::Result<usize> {
        // SAFETY: `fd` is a live session fd; wrapping it in `ManuallyDrop`
        // means this temporary `File` never closes it on drop — the
        // owning `Session` (on the reactor or a worker thread) keeps
        // sole ownership via its `TcpStream`.
        use std::os::fd::FromRawFd;
        let mut borrowed = std::mem::ManuallyDrop::new(unsafe { std::fs::File::from_raw_fd(fd) });
        borrowed.read(buf)
    }

    fn route(&mut self, id: SessionId, item: WorkItem) {
        match &mut self.dispatch {
            Dispatch::Inline { sessions } => {
                let Some(session) = sessions.get_mut(&id) else {
                    return;
                };
                let signal = match item {
                    WorkItem::Read { bytes, .. } => session.process_chunk(&bytes, &self.cache),
                    WorkItem::SessionCtl { .. } => session.control(),
                    _ => return,
                };
                if signal == SessionSignal::Close {
                    if let Some(session) = sessions.remove(&id) {
                        let fd = session.fd();
                        let _ = self.readiness.remove(fd);
                        self.fd_owner.remove(&fd);
                        self.connections.fetch_sub(1, Ordering::AcqRel);
                    }
                }
            }
            Dispatch::Pool { workers, owner, .. } => {
                let Some(&worker_idx) = owner.get(&id) else {
                    return;
                };
                workers[worker_idx].enqueue(item);
            }
        }
    }

    fn close_fd(&mut self, fd: RawFd, id: SessionId) {
        self.fd_owner.remove(&fd);
        let _ = self.readiness.remove(fd);
        match &mut self.dispatch {
            Dispatch::Inline { sessions } => {
                if sessions.remove(&id).is_some() {
                    self.connections.fetch_sub(1, Ordering::AcqRel);
                }
            }
            Dispatch::Pool { workers, owner, .. } => {
                if let Some(worker_idx) = owner.remove(&id) {
                    workers[worker_idx].enqueue(WorkItem::Close { id });
                }
            }
        }
    }
}

fn listener_fd(listener: &TcpListener) -> RawFd {
    use std::os::fd::AsRawFd;
    listener.as_raw_fd()
}
