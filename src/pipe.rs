//! The control pipe: an intra-process wakeup channel carrying small,
//! fixed-size records from session code (running on a worker thread)
//! back to the reactor thread.
//!
//! Writes of up to `PIPE_BUF` (POSIX guarantees at least 512 bytes) are
//! atomic, so multiple worker threads may write concurrently without
//! interleaving each other's records — no additional locking is needed
//! around the write end.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use crate::error::StartupError;

/// Size of one serialized [`SysEvent`]: a one-byte tag plus an 8-byte
/// session id, well under `PIPE_BUF`.
const RECORD_LEN: usize = 9;

const TAG_SESSION_WAKEUP: u8 = 1;

/// A control-pipe record. Only one kind exists today (a session asking
/// to resume a paused write), but the tag byte leaves room for more
/// without changing the framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysEvent {
    pub session_id: u64,
}

impl SysEvent {
    fn serialize(self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0] = TAG_SESSION_WAKEUP;
        buf[1..9].copy_from_slice(&self.session_id.to_ne_bytes());
        buf
    }

    fn deserialize(buf: [u8; RECORD_LEN]) -> Self {
        debug_assert_eq!(buf[0], TAG_SESSION_WAKEUP);
        SysEvent {
            session_id: u64::from_ne_bytes(buf[1..9].try_into().unwrap()),
        }
    }
}

/// The write end, cheaply cloneable (an `Arc` around the shared fd) so
/// every session can hold one.
#[derive(Clone)]
pub struct ControlPipeWriter {
    fd: Arc<OwnedFd>,
}

impl ControlPipeWriter {
    /// Posts a wakeup for `session_id`. Short writes cannot happen for
    /// a `RECORD_LEN`-byte record (well under `PIPE_BUF`), so this
    /// either writes the whole record or fails.
    pub fn post(&self, session_id: u64) -> io::Result<()> {
        let record = SysEvent { session_id }.serialize();
        let mut file = unsafe { std::fs::File::from_raw_fd(self.fd.as_raw_fd()) };
        let result = file.write_all(&record);
        std::mem::forget(file); // fd is owned by `self.fd`, not this temporary
        result
    }
}

/// The read end, owned exclusively by the reactor thread.
pub struct ControlPipeReader {
    fd: OwnedFd,
    buf: Vec<u8>,
}

impl ControlPipeReader {
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Drains every complete record currently available, stopping at
    /// `EAGAIN` (the reactor must call this until it empties, per the
    /// edge-triggered readiness contract).
    pub fn drain(&mut self) -> io::Result<Vec<SysEvent>> {
        let mut events = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let mut file = unsafe { std::fs::File::from_raw_fd(self.fd.as_raw_fd()) };
            let read_result = file.read(&mut chunk);
            std::mem::forget(file);
            match read_result {
                Ok(0) => break,
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
            while self.buf.len() >= RECORD_LEN {
                let record: [u8; RECORD_LEN] = self.buf[..RECORD_LEN].try_into().unwrap();
                events.push(SysEvent::deserialize(record));
                self.buf.drain(..RECORD_LEN);
            }
        }
        Ok(events)
    }
}

/// Creates a control pipe, with the read end non-blocking (the reactor
/// polls it via the readiness set) and the write end left blocking
/// (writes are always `RECORD_LEN` bytes, well under `PIPE_BUF`, so they
/// never actually block).
pub fn control_pipe() -> Result<(ControlPipeReader, ControlPipeWriter), StartupError> {
    let (read_fd, write_fd) = nix::unistd::pipe().map_err(|e| StartupError::Pipe(io::Error::from(e)))?;
    nix::fcntl::fcntl(
        &read_fd,
        nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
    )
    .map_err(|e| StartupError::Pipe(io::Error::from(e)))?;

    let reader = ControlPipeReader {
        fd: read_fd,
        buf: Vec::new(),
    };
    let writer = ControlPipeWriter {
        fd: Arc::new(write_fd),
    };
    Ok((reader, writer))
}
