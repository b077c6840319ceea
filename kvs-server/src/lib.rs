//! Single-threaded, readiness-driven TCP server. Accepts connections,
//! decodes framed commands incrementally, dispatches them against a
//! single owned [`Keyspace`], and periodically sweeps expired keys
//! between readiness waits.
//!
//! Grounded on `radixox-server`'s accept-loop/connection-table shape
//! (`radixox-server/src/bin/resp.rs`), re-architected from its
//! `monoio`/io_uring async reactor onto a `mio` readiness loop per the
//! single-threaded, no-locks, no-async-runtime concurrency model this
//! server targets. Split into a library (this crate) plus a thin `main.rs`
//! binary, in the shape `loja-rs` and `mapuche` use, so integration tests
//! can bind an ephemeral port and drive `serve` directly.

pub mod config;
pub mod connection;
pub mod mux;

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use kvs_core::Keyspace;
use kvs_protocol::ProtocolValue;
use log::{debug, error, warn};
use mio::net::TcpListener;
use mio::{Interest, Token};

use connection::Connection;
use mux::Multiplexer;

const LISTENER_TOKEN: Token = Token(0);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the Unix epoch")
        .as_millis() as u64
}

pub fn bind(address: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(
        address
            .parse()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad address"))?,
    )
}

/// Runs the event loop forever (or until a fatal I/O error). There is no
/// shutdown path by design — the process runs until killed.
pub fn serve(mut listener: TcpListener) -> std::io::Result<()> {
    let mut mux = Multiplexer::create(config::MAX_CONNECTION)?;
    mux.monitor(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections: HashMap<Token, Connection> = HashMap::new();
    let mut next_token = 1usize;
    let mut keyspace = Keyspace::new();
    let mut last_sweep = Instant::now();
    let sweep_interval = Duration::from_millis(config::CLEANUP_FREQUENCY_MS);

    loop {
        let until_next_sweep = sweep_interval.saturating_sub(last_sweep.elapsed());
        let ready: Vec<Token> = match mux.wait(Some(until_next_sweep)) {
            Ok(events) => events.iter().map(|e| e.token()).collect(),
            Err(err) => {
                warn!("mux wait failed, retrying: {err}");
                continue;
            }
        };

        for token in ready {
            if token == LISTENER_TOKEN {
                accept_connections(&mut listener, &mut mux, &mut connections, &mut next_token);
            } else {
                handle_readable(token, &mut connections, &mut mux, &mut keyspace);
            }
        }

        if last_sweep.elapsed() >= sweep_interval {
            let deleted = keyspace.active_expire_cycle(now_ms());
            if deleted > 0 {
                debug!("active expiration swept {deleted} keys");
            }
            last_sweep = Instant::now();
        }
    }
}

fn accept_connections(
    listener: &mut TcpListener,
    mux: &mut Multiplexer,
    connections: &mut HashMap<Token, Connection>,
    next_token: &mut usize,
) {
    loop {
        let mut stream = match listener.accept() {
            Ok((stream, _addr)) => stream,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(err) => {
                error!("accept failed: {err}");
                return;
            }
        };

        let token = Token(*next_token);
        *next_token += 1;

        if let Err(err) = mux.monitor(&mut stream, token, Interest::READABLE) {
            error!("failed to register accepted connection, dropping it: {err}");
            continue;
        }

        connections.insert(token, Connection::new(stream));
    }
}

/// Reads whatever is available, decodes as many frames as are buffered,
/// dispatches each against `keyspace`, and queues the encoded replies.
fn handle_readable(
    token: Token,
    connections: &mut HashMap<Token, Connection>,
    mux: &mut Multiplexer,
    keyspace: &mut Keyspace,
) {
    use std::io::Read;

    let Some(conn) = connections.get_mut(&token) else {
        return;
    };

    let mut scratch = [0u8; config::BUFFER_SIZE];
    loop {
        match conn.stream.read(&mut scratch) {
            Ok(0) => {
                close_connection(token, connections, mux);
                return;
            }
            Ok(n) => conn.read_buf_mut().extend_from_slice(&scratch[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == std::io::ErrorKind::ConnectionReset => {
                close_connection(token, connections, mux);
                return;
            }
            Err(err) => {
                warn!("read failed on connection {}: {err}", token.0);
                return;
            }
        }
    }

    let now = now_ms();
    for frame in conn.drain_frames() {
        let reply = match frame {
            Ok(ProtocolValue::Array(Some(items))) => match frame_to_args(items) {
                Ok(args) => kvs_core::dispatch(keyspace, now, &args),
                Err(err_reply) => err_reply,
            },
            Ok(other) => ProtocolValue::error(format!(
                "ERR expected array of bulk strings, got {other:?}"
            )),
            Err(err) => ProtocolValue::error(format!("ERR protocol error: {err}")),
        };
        conn.queue_reply(&reply.encode());
    }

    if let Err(err) = conn.flush() {
        warn!("write failed on connection {}: {err}", token.0);
    }
}

/// A command frame is an array of bulk strings; anything else in array
/// position is a protocol-level command error, not a decode error.
fn frame_to_args(items: Vec<ProtocolValue>) -> Result<Vec<Bytes>, ProtocolValue> {
    items
        .into_iter()
        .map(|item| match item {
            ProtocolValue::BulkString(Some(b)) => Ok(b),
            _ => Err(ProtocolValue::error("ERR invalid command frame")),
        })
        .collect()
}

fn close_connection(token: Token, connections: &mut HashMap<Token, Connection>, mux: &mut Multiplexer) {
    if let Some(mut conn) = connections.remove(&token) {
        let _ = mux.deregister(&mut conn.stream);
    }
}
