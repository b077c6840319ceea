//! Wire codec for a Redis-style framed text protocol.
//!
//! Supports the five RESP encodings this server needs: integers, simple
//! strings, errors, bulk strings, and arrays. The decoder never panics on
//! malformed input and reports insufficient input distinguishably so a
//! streaming caller (the per-connection read buffer in `kvs-server`) can
//! wait for more bytes instead of treating a partial frame as garbage.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// A single decoded (or to-be-encoded) protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolValue {
    Integer(i64),
    /// Payload MUST NOT contain CR or LF.
    SimpleString(Bytes),
    /// Payload MUST NOT contain CR or LF.
    Error(Bytes),
    /// `None` is the nil bulk string, distinct from `Some(Bytes::new())`.
    BulkString(Option<Bytes>),
    /// `None` is the nil array, distinct from `Some(Vec::new())`.
    Array(Option<Vec<ProtocolValue>>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Not a hard failure: the buffer doesn't yet hold a complete frame.
    #[error("insufficient input")]
    Incomplete,
    #[error("missing CRLF terminator")]
    MissingTerminator,
    #[error("malformed length at position {position}: {fragment:?}")]
    MalformedLength { position: usize, fragment: Bytes },
    #[error("negative length other than -1 at position {position}: {fragment:?}")]
    NegativeLength { position: usize, fragment: Bytes },
    #[error("unsupported type tag {0:#x}")]
    UnsupportedTag(u8),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("simple string payload contains CR or LF")]
    InvalidSimpleString,
}

/// Decodes one frame from the front of `buf`.
///
/// Returns the decoded value along with the number of bytes consumed from
/// `buf`. Returns `DecodeError::Incomplete` when `buf` doesn't yet contain a
/// full frame — this is the only variant a streaming caller should treat as
/// "wait for more bytes"; every other variant is a protocol error.
pub fn decode(buf: &[u8]) -> Result<(ProtocolValue, usize), DecodeError> {
    decode_at(buf, 0)
}

/// Real decode implementation. `base` is the offset of `buf` within the
/// original buffer passed to the outermost [`decode`] call, threaded
/// through recursive array decoding so `MalformedLength`/`NegativeLength`
/// report the position of the offending length prefix, not just of the
/// sub-slice the error was detected in.
fn decode_at(buf: &[u8], base: usize) -> Result<(ProtocolValue, usize), DecodeError> {
    let Some(&tag) = buf.first() else {
        return Err(DecodeError::Incomplete);
    };
    let rest = &buf[1..];
    let rest_base = base + 1;
    match tag {
        b':' => {
            let (n, consumed) = decode_integer(rest, rest_base)?;
            Ok((ProtocolValue::Integer(n), consumed + 1))
        }
        b'+' => {
            let (payload, consumed) = read_line(rest)?;
            Ok((
                ProtocolValue::SimpleString(Bytes::copy_from_slice(payload)),
                consumed + 1,
            ))
        }
        b'-' => {
            let (payload, consumed) = read_line(rest)?;
            Ok((
                ProtocolValue::Error(Bytes::copy_from_slice(payload)),
                consumed + 1,
            ))
        }
        b'$' => {
            let (value, consumed) = decode_bulk_string(rest, rest_base)?;
            Ok((ProtocolValue::BulkString(value), consumed + 1))
        }
        b'*' => {
            let (value, consumed) = decode_array(rest, rest_base)?;
            Ok((ProtocolValue::Array(value), consumed + 1))
        }
        other => Err(DecodeError::UnsupportedTag(other)),
    }
}

/// Scans for the first `CRLF`, returning the bytes before it and the total
/// number of bytes consumed (payload + terminator). A lone `CR` not yet
/// followed by anything is `Incomplete`, not a terminator error — more bytes
/// may still be coming.
fn read_line(buf: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    let Some(cr) = buf.iter().position(|&b| b == b'\r') else {
        return Err(DecodeError::Incomplete);
    };
    match buf.get(cr + 1) {
        None => Err(DecodeError::Incomplete),
        Some(b'\n') => Ok((&buf[..cr], cr + 2)),
        Some(_) => Err(DecodeError::MissingTerminator),
    }
}

/// Parses a signed integer from `bytes`, requiring every byte to be part of
/// the number — unlike `atoi::atoi`, which silently ignores trailing bytes
/// after a valid number (so `"12x"` would otherwise parse as `12`). Exposed
/// for callers outside this crate that parse protocol-adjacent integers
/// (e.g. `SET`'s `EX`/`PX` expiry arguments) and need the same strictness.
pub fn parse_i64_strict(bytes: &[u8]) -> Option<i64> {
    use atoi::FromRadix10SignedChecked;
    let (n, used) = i64::from_radix_10_signed_checked(bytes);
    if used == bytes.len() { n } else { None }
}

fn decode_integer(buf: &[u8], base: usize) -> Result<(i64, usize), DecodeError> {
    let (line, consumed) = read_line(buf)?;
    let n = parse_i64_strict(line).ok_or_else(|| DecodeError::MalformedLength {
        position: base,
        fragment: Bytes::copy_from_slice(line),
    })?;
    Ok((n, consumed))
}

/// Parses a length prefix line (used by both bulk strings and arrays).
/// `-1` is the nil sentinel and comes back as `Ok((None, consumed))`; any
/// other negative value is a decode error.
fn decode_length(buf: &[u8], base: usize) -> Result<(Option<i64>, usize), DecodeError> {
    let (line, consumed) = read_line(buf)?;
    let n = parse_i64_strict(line).ok_or_else(|| DecodeError::MalformedLength {
        position: base,
        fragment: Bytes::copy_from_slice(line),
    })?;
    if n == -1 {
        Ok((None, consumed))
    } else if n < 0 {
        Err(DecodeError::NegativeLength {
            position: base,
            fragment: Bytes::copy_from_slice(line),
        })
    } else {
        Ok((Some(n), consumed))
    }
}

fn decode_bulk_string(buf: &[u8], base: usize) -> Result<(Option<Bytes>, usize), DecodeError> {
    let (len, mut consumed) = decode_length(buf, base)?;
    let Some(len) = len else {
        return Ok((None, consumed));
    };
    let len = len as usize;
    let body = buf.get(consumed..).ok_or(DecodeError::Incomplete)?;
    if body.len() < len + 2 {
        return Err(DecodeError::Incomplete);
    }
    let payload = &body[..len];
    if body[len] != b'\r' || body[len + 1] != b'\n' {
        return Err(DecodeError::MissingTerminator);
    }
    consumed += len + 2;
    Ok((Some(Bytes::copy_from_slice(payload)), consumed))
}

fn decode_array(buf: &[u8], base: usize) -> Result<(Option<Vec<ProtocolValue>>, usize), DecodeError> {
    let (len, mut consumed) = decode_length(buf, base)?;
    let Some(len) = len else {
        return Ok((None, consumed));
    };
    // `len` is attacker-controlled and may vastly exceed what's actually
    // buffered; cap the pre-allocation at what's genuinely in `buf` so a
    // frame like `*2000000000\r\n` with no further bytes can't trigger a
    // multi-GB eager allocation.
    let mut items = Vec::with_capacity((len as usize).min(buf.len()));
    for _ in 0..len {
        let rest = buf.get(consumed..).ok_or(DecodeError::Incomplete)?;
        let (value, used) = decode_at(rest, base + consumed)?;
        items.push(value);
        consumed += used;
    }
    Ok((Some(items), consumed))
}

impl ProtocolValue {
    /// Encodes this value into the protocol's wire format.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            ProtocolValue::Integer(n) => {
                buf.extend_from_slice(b":");
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            ProtocolValue::SimpleString(s) => {
                buf.extend_from_slice(b"+");
                buf.extend_from_slice(s);
                buf.extend_from_slice(b"\r\n");
            }
            ProtocolValue::Error(s) => {
                buf.extend_from_slice(b"-");
                buf.extend_from_slice(s);
                buf.extend_from_slice(b"\r\n");
            }
            ProtocolValue::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
            ProtocolValue::BulkString(Some(s)) => {
                buf.extend_from_slice(b"$");
                buf.extend_from_slice(s.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(s);
                buf.extend_from_slice(b"\r\n");
            }
            ProtocolValue::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
            ProtocolValue::Array(Some(items)) => {
                buf.extend_from_slice(b"*");
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode_into(buf);
                }
            }
        }
    }

    /// Builds a bulk string frame from raw bytes.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        ProtocolValue::BulkString(Some(data.into()))
    }

    /// The nil bulk string sentinel (`$-1\r\n`).
    pub fn nil() -> Self {
        ProtocolValue::BulkString(None)
    }

    /// Builds an error frame from a human-readable message.
    pub fn error(msg: impl Into<Bytes>) -> Self {
        ProtocolValue::Error(msg.into())
    }
}

/// Encodes a simple string, rejecting payloads that contain `CR` or `LF` —
/// a plain `&str`/`String` otherwise encodes as a bulk string via
/// [`Encodable`], never as a simple string.
pub fn encode_simple_string(s: &str) -> Result<Bytes, EncodeError> {
    if s.as_bytes().iter().any(|&b| b == b'\r' || b == b'\n') {
        return Err(EncodeError::InvalidSimpleString);
    }
    Ok(ProtocolValue::SimpleString(Bytes::copy_from_slice(s.as_bytes())).encode())
}

/// Types that can be turned into a [`ProtocolValue`] for encoding.
///
/// A plain string encodes as a **bulk string**, never a simple string — use
/// [`encode_simple_string`] explicitly for status replies like `+OK\r\n`.
/// Unsupported types are a compile-time error rather than a silent fallback,
/// per this crate's design: the source language's polymorphic encoder
/// returned a nil sentinel for unsupported types, which isn't expressible
/// (or desirable) in a statically typed encoder.
pub trait Encodable {
    fn to_protocol_value(&self) -> ProtocolValue;
}

macro_rules! impl_encodable_int {
    ($($t:ty),*) => {
        $(
            impl Encodable for $t {
                fn to_protocol_value(&self) -> ProtocolValue {
                    ProtocolValue::Integer(*self as i64)
                }
            }
        )*
    };
}
impl_encodable_int!(i8, i16, i32, i64, u8, u16, u32);

impl Encodable for str {
    fn to_protocol_value(&self) -> ProtocolValue {
        ProtocolValue::bulk(Bytes::copy_from_slice(self.as_bytes()))
    }
}

impl Encodable for String {
    fn to_protocol_value(&self) -> ProtocolValue {
        self.as_str().to_protocol_value()
    }
}

impl Encodable for Bytes {
    fn to_protocol_value(&self) -> ProtocolValue {
        ProtocolValue::bulk(self.clone())
    }
}

impl Encodable for [u8] {
    fn to_protocol_value(&self) -> ProtocolValue {
        ProtocolValue::bulk(Bytes::copy_from_slice(self))
    }
}

pub fn encode<T: Encodable + ?Sized>(value: &T) -> Bytes {
    value.to_protocol_value().encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_supported_variant() {
        let values = vec![
            ProtocolValue::Integer(0),
            ProtocolValue::Integer(-42),
            ProtocolValue::Integer(i64::MAX),
            ProtocolValue::Integer(i64::MIN),
            ProtocolValue::Error(Bytes::from_static(b"ERR bad")),
            ProtocolValue::bulk(Bytes::from_static(b"hello")),
            ProtocolValue::bulk(Bytes::new()),
            ProtocolValue::nil(),
            ProtocolValue::Array(Some(vec![
                ProtocolValue::Integer(1),
                ProtocolValue::bulk(Bytes::from_static(b"two")),
            ])),
            ProtocolValue::Array(Some(vec![])),
            ProtocolValue::Array(None),
        ];
        for v in values {
            let encoded = v.encode();
            let (decoded, consumed) = decode(&encoded).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn simple_string_round_trips_only_via_explicit_encoder() {
        let encoded = encode_simple_string("PONG").unwrap();
        assert_eq!(&encoded[..], b"+PONG\r\n");
        let (decoded, consumed) = decode(&encoded).unwrap();
        assert_eq!(decoded, ProtocolValue::SimpleString(Bytes::from_static(b"PONG")));
        assert_eq!(consumed, encoded.len());

        // A plain string instead encodes as bulk.
        assert_eq!(&encode("PONG")[..], b"$4\r\nPONG\r\n");
    }

    #[test]
    fn encode_simple_string_rejects_cr_lf() {
        assert_eq!(
            encode_simple_string("bad\r\nstring"),
            Err(EncodeError::InvalidSimpleString)
        );
    }

    #[test]
    fn decode_rejects_missing_crlf() {
        assert_eq!(decode(b"+OK\r"), Err(DecodeError::Incomplete));
        assert_eq!(decode(b"+OK\rX"), Err(DecodeError::MissingTerminator));
    }

    #[test]
    fn decode_rejects_negative_length_other_than_minus_one() {
        assert_eq!(
            decode(b"$-2\r\n"),
            Err(DecodeError::NegativeLength {
                position: 1,
                fragment: Bytes::from_static(b"-2"),
            })
        );
        assert_eq!(
            decode(b"*-5\r\n"),
            Err(DecodeError::NegativeLength {
                position: 1,
                fragment: Bytes::from_static(b"-5"),
            })
        );
    }

    #[test]
    fn decode_rejects_trailing_garbage_after_integer() {
        assert_eq!(
            decode(b":12x\r\n"),
            Err(DecodeError::MalformedLength {
                position: 1,
                fragment: Bytes::from_static(b"12x"),
            })
        );
    }

    #[test]
    fn decode_rejects_trailing_garbage_after_length_prefix() {
        assert_eq!(
            decode(b"$3x\r\nfoo\r\n"),
            Err(DecodeError::MalformedLength {
                position: 1,
                fragment: Bytes::from_static(b"3x"),
            })
        );
        assert_eq!(
            decode(b"*2x\r\n:1\r\n:2\r\n"),
            Err(DecodeError::MalformedLength {
                position: 1,
                fragment: Bytes::from_static(b"2x"),
            })
        );
    }

    #[test]
    fn decode_reports_position_inside_nested_array() {
        // "*1\r\n" occupies indices 0..4, so the inner "$x" tag+length
        // prefix starts at index 4 and its length byte at index 5.
        assert_eq!(
            decode(b"*1\r\n$x\r\nfoo\r\n"),
            Err(DecodeError::MalformedLength {
                position: 5,
                fragment: Bytes::from_static(b"x"),
            })
        );
    }

    #[test]
    fn decode_huge_declared_array_length_does_not_allocate_eagerly() {
        // No panics/aborts and a prompt `Incomplete` instead of an attempted
        // multi-GB `Vec::with_capacity`.
        assert_eq!(decode(b"*2000000000\r\n"), Err(DecodeError::Incomplete));
    }

    #[test]
    fn decode_nil_bulk_and_nil_array() {
        assert_eq!(decode(b"$-1\r\n"), Ok((ProtocolValue::nil(), 5)));
        assert_eq!(decode(b"*-1\r\n"), Ok((ProtocolValue::Array(None), 5)));
    }

    #[test]
    fn decode_reports_insufficient_input_for_truncated_array() {
        assert_eq!(
            decode(b"*2\r\n$5\r\nhello\r\n"),
            Err(DecodeError::Incomplete)
        );
    }

    #[test]
    fn decode_max_i64() {
        assert_eq!(
            decode(b":9223372036854775807\r\n"),
            Ok((ProtocolValue::Integer(i64::MAX), 22))
        );
    }

    #[test]
    fn decode_empty_bulk_string() {
        assert_eq!(
            decode(b"$0\r\n\r\n"),
            Ok((ProtocolValue::bulk(Bytes::new()), 6))
        );
    }

    #[test]
    fn decode_bulk_string_with_embedded_crlf_is_binary_safe() {
        let frame = b"$6\r\na\r\nb\r\n\r\n";
        // length 6 payload is "a\r\nb\r\n"
        let (value, consumed) = decode(frame).unwrap();
        assert_eq!(value, ProtocolValue::bulk(Bytes::from_static(b"a\r\nb\r\n")));
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn decode_unsupported_tag() {
        assert_eq!(decode(b"!foo\r\n"), Err(DecodeError::UnsupportedTag(b'!')));
    }

    #[test]
    fn decode_nested_array() {
        let frame = b"*2\r\n*1\r\n:1\r\n$3\r\nfoo\r\n";
        let (value, consumed) = decode(frame).unwrap();
        assert_eq!(
            value,
            ProtocolValue::Array(Some(vec![
                ProtocolValue::Array(Some(vec![ProtocolValue::Integer(1)])),
                ProtocolValue::bulk(Bytes::from_static(b"foo")),
            ]))
        );
        assert_eq!(consumed, frame.len());
    }
}
