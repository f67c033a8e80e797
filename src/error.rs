//! Error types shared across the protocol, cache, and server modules.
//!
//! Library-facing errors are `thiserror` enums so callers can match on
//! them; `main` collects everything through `anyhow` and maps any
//! failure to exit code 1.

use std::io;

use crate::protocol::Status;

/// A request failed validation or framing and must be answered with a
/// wire-level error [`Status`] rather than processed further.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("key length {0} exceeds MAX_KEYLEN")]
    KeyTooLong(usize),

    #[error("value length {0} exceeds MAX_VALUELEN")]
    ValueTooLong(usize),

    #[error("unrecognized opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("key not found")]
    KeyNotFound,

    #[error("key already exists")]
    KeyExists,

    #[error("cas mismatch")]
    CasMismatch,
}

impl ProtocolError {
    /// Maps a validation failure to the wire status it must be answered
    /// with.
    pub fn status(&self) -> Status {
        match self {
            // Key-length violations map to EINVAL, value-length violations
            // to E2BIG, even though both are raised by the same "too long"
            // shape of validation failure.
            ProtocolError::KeyTooLong(_) => Status::Einval,
            ProtocolError::ValueTooLong(_) => Status::E2big,
            ProtocolError::UnknownOpcode(_) => Status::UnknownCommand,
            ProtocolError::Malformed(_) => Status::Einval,
            ProtocolError::KeyNotFound => Status::KeyEnoent,
            ProtocolError::KeyExists | ProtocolError::CasMismatch => Status::KeyEexists,
        }
    }
}

/// An internal cache-engine failure. Distinct from [`ProtocolError`]:
/// these indicate the cache's own bookkeeping broke an invariant, not
/// that a client sent a bad request.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// `remove` located the key in the index but the LRU list had no
    /// matching node. This is swallowed rather than panicking (a client
    /// retrying `DELETE` on a key that's mid-eviction should not crash
    /// the server), but it is
    /// logged at `warn` since it represents a genuine bookkeeping defect.
    #[error("integrity violation: key present in index but missing from LRU list")]
    Integrity,

    /// A single item's key+value exceeds the cache's own byte budget, so
    /// it can never be admitted no matter how much is evicted.
    #[error("item of {0} bytes exceeds cache capacity of {1} bytes")]
    ItemTooLarge(u64, u64),
}

/// A failure during process startup: socket bind/listen, pipe or epoll
/// creation, or daemonization. Each variant carries the underlying I/O
/// error for context.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create control pipe")]
    Pipe(#[source] io::Error),

    #[error("failed to create epoll instance")]
    Epoll(#[source] io::Error),

    #[error("failed to register fd with epoll")]
    EpollCtl(#[source] io::Error),

    #[error("daemonization failed")]
    Daemonize(#[source] nix::Error),

    #[error("failed to install signal handler")]
    Signal(#[source] nix::Error),
}
