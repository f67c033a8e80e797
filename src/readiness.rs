//! A small readiness abstraction over Linux `epoll`, exposing exactly
//! what the reactor needs: `create`, `add`, `remove`, `wait`. All
//! registrations are edge-triggered; callers MUST drain a ready fd to
//! `EAGAIN` on every wake, since the kernel will not repeat a
//! readiness notification for state that hasn't changed.
//!
//! This wraps `nix::sys::epoll` rather than raw FFI — the contract
//! above (add/remove/wait, edge-triggered, drain-to-`EAGAIN`) is this
//! module's to implement; the syscall plumbing is `nix`'s.

use std::io;
use std::os::fd::{BorrowedFd, RawFd};

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::config::MAX_EPOLL_EVENTS;
use crate::error::StartupError;

/// OR-able readiness flags, re-exported from `nix` since its
/// `EpollFlags` already match the shim's vocabulary
/// (`READABLE`/`WRITABLE`/`ERROR`/`HANGUP`/`EDGE_TRIGGERED`).
pub use nix::sys::epoll::EpollFlags as ReadyFlags;

/// One readiness notification: the user-data value registered with
/// `add` (here, always an fd cast to `u64`) and the flags that fired.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub user_data: u64,
    pub flags: ReadyFlags,
}

pub struct Readiness {
    epoll: Epoll,
}

impl Readiness {
    pub fn create() -> Result<Self, StartupError> {
        let epoll = Epoll::new(EpollCreateFlags::empty())
            .map_err(|e| StartupError::Epoll(io::Error::from(e)))?;
        Ok(Readiness { epoll })
    }

    /// Registers `fd` for `flags`, always OR'd with edge-triggered
    /// mode. `user_data` is returned verbatim in [`ReadyEvent`]s for
    /// this fd; callers use it to look up which session or pipe fired.
    pub fn add(&self, fd: RawFd, user_data: u64, flags: ReadyFlags) -> Result<(), StartupError> {
        // SAFETY: `fd` is valid for the duration of this call; the
        // caller retains ownership and closes it independently.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let event = EpollEvent::new(flags | ReadyFlags::EPOLLET, user_data);
        self.epoll
            .add(borrowed, event)
            .map_err(|e| StartupError::EpollCtl(io::Error::from(e)))
    }

    pub fn remove(&self, fd: RawFd) -> Result<(), StartupError> {
        // SAFETY: see `add`.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll
            .delete(borrowed)
            .map_err(|e| StartupError::EpollCtl(io::Error::from(e)))
    }

    /// Blocks until at least one registered fd is ready, then returns
    /// every notification observed (up to [`MAX_EPOLL_EVENTS`] per
    /// call; the reactor loop simply calls `wait` again immediately
    /// after processing a full batch).
    pub fn wait(&self) -> io::Result<Vec<ReadyEvent>> {
        let mut raw = vec![EpollEvent::empty(); MAX_EPOLL_EVENTS];
        let n = self
            .epoll
            .wait(&mut raw, EpollTimeout::NONE)
            .map_err(io::Error::from)?;
        Ok(raw[..n]
            .iter()
            .map(|e| ReadyEvent {
                user_data: e.data(),
                flags: e.events(),
            })
            .collect())
    }
}
