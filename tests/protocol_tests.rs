//! End-to-end tests of the binary memcache protocol over a real TCP
//! connection. Each test starts its own server on an OS-assigned
//! ephemeral port and drives it as a black-box client would, rather
//! than calling into the session/cache modules directly.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use mcached::config::Settings;
use mcached::reactor::Reactor;

const OP_GET: u8 = 0x00;
const OP_SET: u8 = 0x01;
const OP_DELETE: u8 = 0x04;

const STATUS_SUCCESS: u16 = 0x0000;
const STATUS_KEY_ENOENT: u16 = 0x0001;
const STATUS_KEY_EEXISTS: u16 = 0x0002;
const STATUS_E2BIG: u16 = 0x0003;
const STATUS_EINVAL: u16 = 0x0004;

fn settings(cache_bytes: u64, threads: usize) -> Settings {
    settings_with_cap(cache_bytes, threads, 64)
}

fn settings_with_cap(cache_bytes: u64, threads: usize, max_connections: usize) -> Settings {
    Settings {
        daemonize: false,
        listen_addr: Some(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
        port: 0,
        threads,
        cache_bytes,
        max_connections,
    }
}

/// Starts a server in a background thread and returns the address it
/// bound to. The thread is intentionally leaked: `Reactor::run` loops
/// forever per the server's no-graceful-shutdown contract, and the
/// test process exits once the test binary finishes.
fn spawn_server(settings: Settings) -> SocketAddr {
    let reactor = Reactor::new(&settings).expect("reactor construction failed");
    let addr = reactor.local_addr().expect("bound address");
    thread::spawn(move || {
        let _ = reactor.run();
    });
    addr
}

fn request(opcode: u8, extras: &[u8], key: &[u8], value: &[u8], opaque: u32, cas: u64) -> Vec<u8> {
    let bodylen = extras.len() + key.len() + value.len();
    let mut buf = vec![0u8; 24 + bodylen];
    buf[0] = 0x80;
    buf[1] = opcode;
    buf[2..4].copy_from_slice(&(key.len() as u16).to_be_bytes());
    buf[4] = extras.len() as u8;
    buf[6..8].copy_from_slice(&0u16.to_be_bytes());
    buf[8..12].copy_from_slice(&(bodylen as u32).to_be_bytes());
    buf[12..16].copy_from_slice(&opaque.to_be_bytes());
    buf[16..24].copy_from_slice(&cas.to_be_bytes());
    buf[24..24 + extras.len()].copy_from_slice(extras);
    buf[24 + extras.len()..24 + extras.len() + key.len()].copy_from_slice(key);
    buf[24 + extras.len() + key.len()..].copy_from_slice(value);
    buf
}

fn set_request(key: &[u8], value: &[u8], opaque: u32, cas: u64) -> Vec<u8> {
    request(OP_SET, &[0u8; 8], key, value, opaque, cas)
}

fn get_request(key: &[u8], opaque: u32) -> Vec<u8> {
    request(OP_GET, &[], key, &[], opaque, 0)
}

fn delete_request(key: &[u8], opaque: u32, cas: u64) -> Vec<u8> {
    request(OP_DELETE, &[], key, &[], opaque, cas)
}

struct Response {
    status: u16,
    opaque: u32,
    cas: u64,
    extlen: u8,
    body: Vec<u8>,
}

fn read_response(stream: &mut TcpStream) -> Response {
    let mut header = [0u8; 24];
    stream.read_exact(&mut header).expect("read header");
    assert_eq!(header[0], 0x81, "response magic");
    let extlen = header[4];
    let status = u16::from_be_bytes([header[6], header[7]]);
    let bodylen = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    let opaque = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let cas = u64::from_be_bytes(header[16..24].try_into().unwrap());
    let mut body = vec![0u8; bodylen as usize];
    stream.read_exact(&mut body).expect("read body");
    Response {
        status,
        opaque,
        cas,
        extlen,
        body,
    }
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

#[test]
fn set_then_get_roundtrips_value() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    stream.write_all(&set_request(b"foo", b"bar", 1, 0)).unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_SUCCESS);
    assert_eq!(resp.opaque, 1);
    assert_eq!(resp.body.len(), 0);

    stream.write_all(&get_request(b"foo", 2)).unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_SUCCESS);
    assert_eq!(resp.extlen, 4);
    assert_eq!(&resp.body[0..4], &[0, 0, 0, 0]);
    assert_eq!(&resp.body[4..], b"bar");
}

#[test]
fn get_response_flags_are_always_zero_regardless_of_stored_flags() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    // Non-zero client flags (4B) + expiration (4B) in the SET extras.
    let mut extras = [0u8; 8];
    extras[0..4].copy_from_slice(&0xdeadbeefu32.to_be_bytes());
    stream
        .write_all(&request(OP_SET, &extras, b"flagged", b"v", 0, 0))
        .unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_SUCCESS);

    stream.write_all(&get_request(b"flagged", 0)).unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_SUCCESS);
    assert_eq!(resp.extlen, 4);
    assert_eq!(&resp.body[0..4], &[0, 0, 0, 0], "GET must never echo stored flags");
    assert_eq!(&resp.body[4..], b"v");
}

#[test]
fn get_on_missing_key_is_key_enoent() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    stream.write_all(&get_request(b"absent", 9)).unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_KEY_ENOENT);
    assert_eq!(resp.body, b"Not found");
}

#[test]
fn cas_mismatch_leaves_entry_unchanged() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    stream.write_all(&set_request(b"foo", b"bar", 1, 0)).unwrap();
    let stored = read_response(&mut stream);
    assert_eq!(stored.status, STATUS_SUCCESS);

    stream
        .write_all(&set_request(b"foo", b"baz", 2, 0xDEAD_BEEF))
        .unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_KEY_EEXISTS);
    assert_eq!(resp.body, b"Entry exists for key");

    stream.write_all(&get_request(b"foo", 3)).unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(&resp.body[4..], b"bar");
}

#[test]
fn delete_round_trip() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    stream.write_all(&set_request(b"foo", b"bar", 1, 0)).unwrap();
    read_response(&mut stream);

    stream.write_all(&delete_request(b"foo", 4, 0)).unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_SUCCESS);
    assert_eq!(resp.body.len(), 0);

    stream.write_all(&get_request(b"foo", 5)).unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_KEY_ENOENT);
}

#[test]
fn eviction_removes_least_recently_used() {
    let addr = spawn_server(settings(4096, 1));
    let mut stream = connect(addr);

    let value = vec![0u8; 2000];
    for key in [b"k1".as_slice(), b"k2", b"k3"] {
        stream.write_all(&set_request(key, &value, 0, 0)).unwrap();
        let resp = read_response(&mut stream);
        assert_eq!(resp.status, STATUS_SUCCESS);
    }

    stream.write_all(&get_request(b"k1", 0)).unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_KEY_ENOENT);

    stream.write_all(&get_request(b"k2", 0)).unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_SUCCESS);

    stream.write_all(&get_request(b"k3", 0)).unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_SUCCESS);
}

#[test]
fn get_refreshes_recency_before_eviction() {
    let addr = spawn_server(settings(4096, 1));
    let mut stream = connect(addr);
    let value = vec![0u8; 2000];

    stream.write_all(&set_request(b"k1", &value, 0, 0)).unwrap();
    read_response(&mut stream);
    stream.write_all(&set_request(b"k2", &value, 0, 0)).unwrap();
    read_response(&mut stream);

    stream.write_all(&get_request(b"k1", 0)).unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_SUCCESS);

    stream.write_all(&set_request(b"k3", &value, 0, 0)).unwrap();
    read_response(&mut stream);

    stream.write_all(&get_request(b"k1", 0)).unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_SUCCESS);
    stream.write_all(&get_request(b"k2", 0)).unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_KEY_ENOENT);
    stream.write_all(&get_request(b"k3", 0)).unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_SUCCESS);
}

#[test]
fn oversize_value_is_rejected_and_cache_stays_empty() {
    let addr = spawn_server(settings(1024, 1));
    let mut stream = connect(addr);

    let big_value = vec![0u8; 2000];
    stream
        .write_all(&set_request(b"big", &big_value, 0, 0))
        .unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_E2BIG);

    // E2BIG is an unrecoverable framing violation: the server sends the
    // response but then tears down the connection.
    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);

    // A fresh connection observes the cache was never populated.
    let mut stream2 = connect(addr);
    stream2.write_all(&get_request(b"big", 0)).unwrap();
    assert_eq!(read_response(&mut stream2).status, STATUS_KEY_ENOENT);
}

#[test]
fn chunked_large_response_arrives_whole_and_in_order() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    let value = vec![0xABu8; 32 * 1024];
    stream.write_all(&set_request(b"big", &value, 0, 0)).unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_SUCCESS);

    stream.write_all(&get_request(b"big", 0)).unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_SUCCESS);
    assert_eq!(resp.body.len(), 4 + value.len());
    assert_eq!(&resp.body[4..], value.as_slice());
}

#[test]
fn key_length_zero_is_einval_and_connection_stays_open() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    stream.write_all(&get_request(b"", 0)).unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, STATUS_EINVAL);

    // EINVAL is recoverable: the connection must still be usable.
    stream.write_all(&set_request(b"ok", b"v", 1, 0)).unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_SUCCESS);
}

#[test]
fn key_length_at_250_is_accepted_and_251_is_rejected() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    let key_250 = vec![b'k'; 250];
    stream
        .write_all(&set_request(&key_250, b"v", 0, 0))
        .unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_SUCCESS);

    let key_251 = vec![b'k'; 251];
    stream
        .write_all(&set_request(&key_251, b"v", 0, 0))
        .unwrap();
    assert_eq!(read_response(&mut stream).status, STATUS_EINVAL);
}

#[test]
fn unknown_opcode_is_unsupported_command() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    stream
        .write_all(&request(0x7f, &[], b"k", b"v", 0, 0))
        .unwrap();
    let resp = read_response(&mut stream);
    assert_eq!(resp.status, 0x0081);
    assert_eq!(resp.body, b"Unsupported command");
}

#[test]
fn bad_magic_terminates_the_connection() {
    let addr = spawn_server(settings(1 << 20, 1));
    let mut stream = connect(addr);

    stream.write_all(&[0x00u8; 24]).unwrap();
    let mut byte = [0u8; 1];
    let n = stream.read(&mut byte).unwrap_or(0);
    assert_eq!(n, 0, "server must close the connection on bad magic");
}

#[test]
fn connection_cap_rejects_beyond_the_configured_limit() {
    let addr = spawn_server(settings_with_cap(1 << 20, 1, 1));

    // Held open so it counts against the cap; the server must keep
    // serving it normally.
    let mut first = connect(addr);
    first.write_all(&set_request(b"k", b"v", 0, 0)).unwrap();
    assert_eq!(read_response(&mut first).status, STATUS_SUCCESS);

    // Give the reactor a moment to register the first connection
    // before the second one races the accept-cap check.
    thread::sleep(Duration::from_millis(50));

    let mut second = connect(addr);
    let mut byte = [0u8; 1];
    let n = second.read(&mut byte).unwrap_or(0);
    assert_eq!(n, 0, "connection beyond the cap must be closed immediately");

    // The first connection must be unaffected by the rejected second one.
    first.write_all(&get_request(b"k", 0)).unwrap();
    assert_eq!(read_response(&mut first).status, STATUS_SUCCESS);
}

#[test]
fn multi_worker_mode_serves_concurrent_clients() {
    let addr = spawn_server(settings(4 << 20, 3));

    let handles: Vec<_> = (0..8u32)
        .map(|i| {
            thread::spawn(move || {
                let mut stream = connect(addr);
                let key = format!("conn-{i}");
                let value = format!("value-{i}");
                stream
                    .write_all(&set_request(key.as_bytes(), value.as_bytes(), i, 0))
                    .unwrap();
                let resp = read_response(&mut stream);
                assert_eq!(resp.status, STATUS_SUCCESS);

                stream.write_all(&get_request(key.as_bytes(), i)).unwrap();
                let resp = read_response(&mut stream);
                assert_eq!(resp.status, STATUS_SUCCESS);
                assert_eq!(&resp.body[4..], value.as_bytes());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
