//! Per-connection protocol state: request accumulation, header parsing,
//! validation, dispatch to the cache, response framing, and paced
//! writes.

use std::io::{self, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{Cache, Item, RemoveOutcome, SetOutcome};
use crate::config::MAX_WRITE_SIZE;
use crate::error::CacheError;
use crate::pipe::ControlPipeWriter;
use crate::protocol::{self, Opcode, RequestHeader, Status};

/// Identifies a session across worker/reactor boundaries. A newtype
/// around an opaque counter rather than a raw pointer into the session:
/// threading a raw pointer between the reactor and worker threads has
/// no safe Rust equivalent, so workers index their session set by this
/// id instead (see [`crate::worker`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// What a session method asks its caller (the worker, via the reactor)
/// to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// Keep the session open; no special follow-up needed.
    Continue,
    /// A write was paced; a control-pipe wakeup has already been
    /// posted and `control()` will be invoked again once it's drained.
    PauseWrite,
    /// Destroy the session.
    Close,
}

struct WriteCtl {
    buf: Vec<u8>,
    offset: usize,
}

/// Per-connection state. Owned by exactly one worker.
pub struct Session {
    id: SessionId,
    stream: TcpStream,
    ctl: ControlPipeWriter,
    request: Vec<u8>,
    write_ctl: Option<WriteCtl>,
    /// Set when the pending write is a final error response for an
    /// unrecoverable framing violation (`E2BIG`): the response must
    /// still reach the client before the connection is torn down.
    close_after_write: bool,
    /// First-seen timestamp. Reserved for an idle timeout that this
    /// server does not enforce.
    #[allow(dead_code)]
    created_at: Instant,
}

impl Session {
    pub fn new(id: SessionId, stream: TcpStream, ctl: ControlPipeWriter) -> Self {
        Session {
            id,
            stream,
            ctl,
            request: Vec::new(),
            write_ctl: None,
            close_after_write: false,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Handles one chunk of inbound bytes, per the `idle`/`accumulating`
    /// transitions in the session state machine.
    pub fn process_chunk(&mut self, bytes: &[u8], cache: &Cache) -> SessionSignal {
        if self.write_ctl.is_some() {
            // Inbound data while a response is still draining: the
            // client is not honoring request/response framing.
            return SessionSignal::Close;
        }

        self.request.extend_from_slice(bytes);
        if self.request.is_empty() {
            return SessionSignal::Continue;
        }
        if self.request[0] != protocol::REQUEST_MAGIC {
            return SessionSignal::Close;
        }
        if self.request.len() < protocol::HEADER_LEN {
            return SessionSignal::Continue;
        }

        let header = RequestHeader::parse(&self.request[..protocol::HEADER_LEN]);
        let opcode = match header.validate() {
            Ok(opcode) => opcode,
            Err(err) => {
                let status = err.status();
                let recoverable = matches!(status, Status::Einval | Status::UnknownCommand);
                let response =
                    protocol::error_response(header.opcode, status, header.opaque, header.cas);
                self.request.clear();
                self.close_after_write = !recoverable;
                return self.begin_write(response);
            }
        };

        let total_len = header.total_len();
        if self.request.len() > total_len {
            return SessionSignal::Close;
        }
        if self.request.len() < total_len {
            return SessionSignal::Continue;
        }

        let (response, status) = self.dispatch(opcode, &header, cache);
        self.request.clear();
        self.close_after_write = status == Status::E2big;
        self.begin_write(response)
    }

    /// Resumes a paced write after the reactor observes this session's
    /// control-pipe wakeup.
    pub fn control(&mut self) -> SessionSignal {
        if self.write_ctl.is_none() {
            // A wakeup fired with nothing to write: bookkeeping drifted
            // between the session and the reactor/pipe.
            return SessionSignal::Close;
        }
        self.continue_write()
    }

    /// Executes a fully-framed request against the cache and builds its
    /// response, alongside the [`Status`] that response carries — the
    /// caller uses the status to decide whether the connection stays
    /// open afterward.
    fn dispatch(&mut self, opcode: Opcode, header: &RequestHeader, cache: &Cache) -> (Vec<u8>, Status) {
        let extlen = header.extlen as usize;
        let keylen = header.keylen as usize;
        let key_start = protocol::HEADER_LEN + extlen;

        match opcode {
            Opcode::Set => {
                let flags = u32::from_be_bytes(
                    self.request[protocol::HEADER_LEN..protocol::HEADER_LEN + 4]
                        .try_into()
                        .unwrap(),
                );
                let buf = std::mem::take(&mut self.request).into_boxed_slice();
                let item = Arc::new(Item::new(buf, extlen, keylen, flags, header.cas));
                let outcome = if header.cas != 0 {
                    cache.cas(item, header.cas)
                } else {
                    cache.set(item).map(|()| SetOutcome::Stored)
                };
                match outcome {
                    Ok(SetOutcome::Stored) => (
                        protocol::success_response(Opcode::Set as u8, header.opaque, header.cas),
                        Status::Success,
                    ),
                    Ok(SetOutcome::Conflict) => (
                        protocol::error_response(
                            Opcode::Set as u8,
                            Status::KeyEexists,
                            header.opaque,
                            header.cas,
                        ),
                        Status::KeyEexists,
                    ),
                    Err(CacheError::ItemTooLarge(..)) => (
                        protocol::error_response(
                            Opcode::Set as u8,
                            Status::E2big,
                            header.opaque,
                            header.cas,
                        ),
                        Status::E2big,
                    ),
                    Err(CacheError::Integrity) => {
                        log::warn!("cache integrity violation handling SET");
                        (
                            protocol::error_response(
                                Opcode::Set as u8,
                                Status::Einval,
                                header.opaque,
                                header.cas,
                            ),
                            Status::Einval,
                        )
                    }
                }
            }
            Opcode::Delete => {
                let key = self.request[key_start..key_start + keylen].to_vec();
                match cache.remove(&key, header.cas) {
                    RemoveOutcome::Removed => (
                        protocol::success_response(Opcode::Delete as u8, header.opaque, header.cas),
                        Status::Success,
                    ),
                    RemoveOutcome::Conflict => (
                        protocol::error_response(
                            Opcode::Delete as u8,
                            Status::KeyEexists,
                            header.opaque,
                            header.cas,
                        ),
                        Status::KeyEexists,
                    ),
                }
            }
            Opcode::Get => {
                let key = &self.request[key_start..key_start + keylen];
                match cache.get(key) {
                    Some(item) => (
                        // GET responses always report flags=0: this server
                        // never acts on stored flags, so there is nothing
                        // meaningful to echo back.
                        protocol::get_response(item.value(), 0u32, header.opaque, header.cas),
                        Status::Success,
                    ),
                    None => (
                        protocol::error_response(
                            Opcode::Get as u8,
                            Status::KeyEnoent,
                            header.opaque,
                            header.cas,
                        ),
                        Status::KeyEnoent,
                    ),
                }
            }
        }
    }

    fn begin_write(&mut self, buf: Vec<u8>) -> SessionSignal {
        self.write_ctl = Some(WriteCtl { buf, offset: 0 });
        self.continue_write()
    }

    /// Writes at most [`MAX_WRITE_SIZE`] bytes of the pending response
    /// in a single non-blocking call, pacing the remainder across
    /// future `control()` invocations so one large response cannot
    /// starve other sessions on the same worker.
    fn continue_write(&mut self) -> SessionSignal {
        let Some(ctl) = self.write_ctl.as_mut() else {
            return SessionSignal::Continue;
        };
        let remaining = &ctl.buf[ctl.offset..];
        let chunk_len = remaining.len().min(MAX_WRITE_SIZE);
        match self.stream.write(&remaining[..chunk_len]) {
            Ok(0) => SessionSignal::Close,
            Ok(n) => {
                ctl.offset += n;
                if ctl.offset >= ctl.buf.len() {
                    self.write_ctl = None;
                    if self.close_after_write {
                        SessionSignal::Close
                    } else {
                        SessionSignal::Continue
                    }
                } else {
                    self.pause_for_write()
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.pause_for_write(),
            Err(_) => SessionSignal::Close,
        }
    }

    fn pause_for_write(&mut self) -> SessionSignal {
        match self.ctl.post(self.id.0) {
            Ok(()) => SessionSignal::PauseWrite,
            Err(_) => SessionSignal::Close,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("fd", &self.fd())
            .field("writing", &self.write_ctl.is_some())
            .finish()
    }
}
