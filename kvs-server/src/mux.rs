//! A thin wrapper around `mio`'s readiness poller, shaped like the
//! `create`/`monitor`/`wait`/`close` abstraction this server is built
//! around rather than exposing `mio::Poll` directly to the event loop.
//!
//! None of the example repos wrap an OS readiness primitive this way —
//! `radixox-server` runs on `monoio`'s io_uring reactor instead — so this
//! module has no direct teacher precedent; `mio` is the standard Rust
//! crate for exactly this role (the same one `tokio`'s own reactor is
//! built on), which is why it's used here instead of hand-rolling epoll.

use std::io;
use std::time::Duration;

use mio::event::Events;
use mio::{Interest, Poll, Token};

/// Pre-allocated up to [`crate::config::MAX_CONNECTION`] ready-event slots.
pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    /// Creates a multiplexer with a ready-events buffer sized for
    /// `capacity` concurrent connections.
    pub fn create(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
        })
    }

    /// Registers `fd` for the given interest set. Re-registering the same
    /// token is rejected by `mio`; callers needing idempotence should
    /// `reregister` instead, but this server only ever registers a token
    /// once, at accept time.
    pub fn monitor(&mut self, source: &mut impl mio::event::Source, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    pub fn deregister(&mut self, source: &mut impl mio::event::Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Blocks until at least one event is ready, or `timeout` elapses
    /// (used by the event loop to pace active expiration; the
    /// multiplexer abstraction itself is content to block indefinitely
    /// when `timeout` is `None`). Returns `Ok` with an empty event set
    /// on timeout or on interruption by a signal — the caller treats
    /// interruption as "retry, not fatal".
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<&Events> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => Ok(&self.events),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(&self.events),
            Err(err) => Err(err),
        }
    }
}
