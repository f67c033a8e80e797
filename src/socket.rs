//! Binding, listening, and non-blocking accept.

use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;

use crate::error::StartupError;

/// Binds and listens on `addr:port`, non-blocking. `addr` of `None`
/// binds all interfaces via the IPv6 unspecified address, which on
/// most platforms also accepts IPv4 connections through dual-stack
/// mapping.
pub fn bind(addr: Option<IpAddr>, port: u16) -> Result<TcpListener, StartupError> {
    let ip = addr.unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED));
    let socket_addr = SocketAddr::new(ip, port);
    let listener = TcpListener::bind(socket_addr).map_err(|e| StartupError::Bind {
        addr: socket_addr.to_string(),
        source: e,
    })?;
    listener.set_nonblocking(true).map_err(|e| StartupError::Bind {
        addr: socket_addr.to_string(),
        source: e,
    })?;
    Ok(listener)
}

/// Accepts every pending connection until `EAGAIN`/`EWOULDBLOCK`,
/// setting each to non-blocking before handing it back.
pub fn accept_all(listener: &TcpListener) -> io::Result<Vec<TcpStream>> {
    let mut accepted = Vec::new();
    loop {
        match listener.accept() {
            Ok((stream, _peer)) => {
                stream.set_nonblocking(true)?;
                accepted.push(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(accepted)
}

/// Raw fd of a stream, for readiness registration.
pub fn raw_fd(stream: &TcpStream) -> std::os::fd::RawFd {
    stream.as_raw_fd()
}
