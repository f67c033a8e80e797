//! Protocol and runtime constants.
//!
//! A handful of `const`s shared by the cache, protocol, and reactor
//! modules, plus the runtime [`Settings`] assembled from the CLI.

use std::net::IpAddr;

/// Server version string, echoed nowhere on the wire (no VERSION command
/// is implemented) but reported by `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum accepted key length, in bytes.
pub const MAX_KEYLEN: usize = 250;

/// Maximum accepted value length, in bytes.
pub const MAX_VALUELEN: usize = 1024 * 1024;

/// Maximum number of response bytes written to a socket in a single
/// non-blocking `write` call. Larger responses are paced across multiple
/// [`crate::session::Session::control`] invocations so that one large
/// `GET` cannot starve other sessions on the same worker.
pub const MAX_WRITE_SIZE: usize = 4 * 1024;

/// Maximum number of readiness events drained per `wait()` call.
pub const MAX_EPOLL_EVENTS: usize = 128;

/// Chunk size the reactor reads from a readable session fd before
/// re-checking readiness. Keeps one chatty connection from monopolizing
/// the reactor thread between `EAGAIN`s.
pub const READ_CHUNK_SIZE: usize = 512;

/// Default TCP port, per the binary memcache protocol convention.
pub const DEFAULT_PORT: u16 = 11211;

/// Fully resolved runtime configuration, built from [`crate::cli::CliArgs`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Run detached from the controlling terminal.
    pub daemonize: bool,
    /// Listen address; `None` binds all interfaces.
    pub listen_addr: Option<IpAddr>,
    /// Listen port.
    pub port: u16,
    /// Number of worker threads (>= 1). `1` collapses to single-worker
    /// in-line dispatch with an unsynchronized cache.
    pub threads: usize,
    /// Cache memory budget, in bytes.
    pub cache_bytes: u64,
    /// Maximum simultaneous connections the reactor will accept.
    pub max_connections: usize,
}
