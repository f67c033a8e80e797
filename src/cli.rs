//! Command-line parsing via a `clap` derive struct; `-p5000`-style
//! attached short flags keep working since clap accepts both `-p 5000`
//! and `-p5000`.

use std::net::IpAddr;

use clap::Parser;

use crate::config::{Settings, DEFAULT_PORT};

#[derive(Debug, Parser)]
#[command(name = "mcached", version, about = "An in-memory LRU cache server speaking the binary memcache protocol")]
pub struct CliArgs {
    /// Run detached from the controlling terminal.
    #[arg(short = 'd', long = "daemonize")]
    pub daemonize: bool,

    /// Listening address (default: all interfaces).
    #[arg(short = 'l', long = "listen")]
    pub listen: Option<IpAddr>,

    /// Listening port.
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Worker thread count. 1 collapses to single-worker, unsynchronized mode.
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    pub threads: usize,

    /// Cache memory budget, in mebibytes.
    #[arg(short = 'm', long = "memory", default_value_t = 500)]
    pub memory_mb: u64,

    /// Max simultaneous connections.
    #[arg(short = 'c', long = "max-connections", default_value_t = 1024)]
    pub max_connections: usize,
}

impl CliArgs {
    pub fn into_settings(self) -> Settings {
        Settings {
            daemonize: self.daemonize,
            listen_addr: self.listen,
            port: self.port,
            threads: self.threads.max(1),
            cache_bytes: self.memory_mb * 1024 * 1024,
            max_connections: self.max_connections,
        }
    }
}
