//! Command dispatch: maps an array-of-bulk-strings frame to a keyspace
//! mutation and an encoded reply.
//!
//! Grounded on `radixox-server`'s table-driven `dispatch_command` (a slice
//! of `(name, Handler)` matched with `eq_ignore_ascii_case`), simplified to
//! one handler shape since every command here either ignores the keyspace
//! (`PING`) or needs it directly, unlike the original's `Static`/`Args`/
//! `Data`/`DataOnly` split across many more command families.

use bytes::Bytes;
use kvs_protocol::ProtocolValue;
use thiserror::Error;

use crate::keyspace::{Keyspace, TtlStatus};

/// Errors a command handler can fail with. Mirrors `kvs_protocol::DecodeError`:
/// a thiserror-derived enum at this layer's boundary rather than ad-hoc
/// `ProtocolValue::error("...")` strings scattered through the handlers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR empty command")]
    EmptyCommand,
    #[error("CMD NOT FOUND")]
    UnknownCommand,
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
    #[error("ERR empty key")]
    EmptyKey,
    #[error("ERR invalid time")]
    InvalidTime,
    #[error("ERR invalid type of expiry time")]
    InvalidExpiryType,
}

impl From<CommandError> for ProtocolValue {
    fn from(err: CommandError) -> Self {
        ProtocolValue::error(err.to_string())
    }
}

type Handler = fn(&[Bytes], &mut Keyspace, u64) -> Result<ProtocolValue, CommandError>;

const COMMANDS: &[(&[u8], Handler)] = &[
    (b"PING", cmd_ping),
    (b"GET", cmd_get),
    (b"SET", cmd_set),
    (b"TTL", cmd_ttl),
    (b"DEL", cmd_del),
    (b"SADD", cmd_sadd),
    (b"SREM", cmd_srem),
    (b"SMEMBERS", cmd_smembers),
    (b"SCARD", cmd_scard),
    (b"SMISMEMBER", cmd_smismember),
    (b"SINTER", cmd_sinter),
];

/// Routes a parsed command (first element is the name, rest are
/// arguments) to its handler. Unknown names reply with `CMD NOT FOUND`.
pub fn dispatch(keyspace: &mut Keyspace, now_ms: u64, args: &[Bytes]) -> ProtocolValue {
    dispatch_inner(keyspace, now_ms, args).unwrap_or_else(Into::into)
}

fn dispatch_inner(
    keyspace: &mut Keyspace,
    now_ms: u64,
    args: &[Bytes],
) -> Result<ProtocolValue, CommandError> {
    let (name, rest) = args.split_first().ok_or(CommandError::EmptyCommand)?;

    for (cmd_name, handler) in COMMANDS {
        if name.eq_ignore_ascii_case(cmd_name) {
            return handler(rest, keyspace, now_ms);
        }
    }

    Err(CommandError::UnknownCommand)
}

fn cmd_ping(
    args: &[Bytes],
    _keyspace: &mut Keyspace,
    _now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    match args {
        [] => Ok(ProtocolValue::SimpleString(Bytes::from_static(b"PONG"))),
        [msg] => Ok(ProtocolValue::bulk(msg.clone())),
        _ => Err(CommandError::WrongArity("PING")),
    }
}

fn cmd_get(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    let [key] = args else {
        return Err(CommandError::WrongArity("GET"));
    };
    if key.is_empty() {
        return Err(CommandError::EmptyKey);
    }
    Ok(match keyspace.get_string(key, now_ms) {
        Some(value) => ProtocolValue::bulk(value),
        None => ProtocolValue::nil(),
    })
}

/// Parses a SET expiry clause into an absolute expiry in ms.
fn parse_expiry(option: &[u8], value: &[u8], now_ms: u64) -> Result<u64, CommandError> {
    let n = kvs_protocol::parse_i64_strict(value).ok_or(CommandError::InvalidTime)?;

    if option.eq_ignore_ascii_case(b"EX") {
        if n <= 0 {
            return Err(CommandError::InvalidTime);
        }
        Ok(now_ms + n as u64 * 1000)
    } else if option.eq_ignore_ascii_case(b"PX") {
        if n <= 0 {
            return Err(CommandError::InvalidTime);
        }
        Ok(now_ms + n as u64)
    } else if option.eq_ignore_ascii_case(b"EXAT") {
        if n <= (now_ms / 1000) as i64 {
            return Err(CommandError::InvalidTime);
        }
        Ok(n as u64 * 1000)
    } else if option.eq_ignore_ascii_case(b"PXAT") {
        if n <= now_ms as i64 {
            return Err(CommandError::InvalidTime);
        }
        Ok(n as u64)
    } else {
        Err(CommandError::InvalidExpiryType)
    }
}

fn cmd_set(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    let (key, value, expiry_ms) = match args {
        [key, value] => (key, value, 0u64),
        [key, value, option, opt_value] => {
            (key, value, parse_expiry(option, opt_value, now_ms)?)
        }
        _ => return Err(CommandError::WrongArity("SET")),
    };
    if key.is_empty() {
        return Err(CommandError::EmptyKey);
    }
    keyspace.set_string(key.clone(), value.clone(), expiry_ms);
    Ok(ProtocolValue::SimpleString(Bytes::from_static(b"OK")))
}

fn cmd_ttl(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    let [key] = args else {
        return Err(CommandError::WrongArity("TTL"));
    };
    if key.is_empty() {
        return Err(CommandError::EmptyKey);
    }
    Ok(match keyspace.ttl(key, now_ms) {
        TtlStatus::Missing => ProtocolValue::Integer(-2),
        TtlStatus::NoExpiry => ProtocolValue::Integer(-1),
        TtlStatus::ExpiresIn(secs) => ProtocolValue::Integer(secs as i64),
    })
}

fn cmd_del(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    let removed = args
        .iter()
        .filter(|key| keyspace.delete_live(key, now_ms))
        .count();
    Ok(ProtocolValue::Integer(removed as i64))
}

fn cmd_sadd(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    let [key, members @ ..] = args else {
        return Err(CommandError::WrongArity("SADD"));
    };
    if members.is_empty() {
        return Err(CommandError::WrongArity("SADD"));
    }
    Ok(ProtocolValue::Integer(keyspace.sadd(key, members, now_ms) as i64))
}

fn cmd_srem(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    let [key, members @ ..] = args else {
        return Err(CommandError::WrongArity("SREM"));
    };
    if members.is_empty() {
        return Err(CommandError::WrongArity("SREM"));
    }
    Ok(ProtocolValue::Integer(keyspace.srem(key, members, now_ms) as i64))
}

fn cmd_smembers(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    let [key] = args else {
        return Err(CommandError::WrongArity("SMEMBERS"));
    };
    let members = keyspace.smembers(key, now_ms);
    Ok(ProtocolValue::Array(
        Some(members.into_iter().map(ProtocolValue::bulk).collect()),
    ))
}

fn cmd_scard(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    let [key] = args else {
        return Err(CommandError::WrongArity("SCARD"));
    };
    Ok(ProtocolValue::Integer(keyspace.scard(key, now_ms) as i64))
}

fn cmd_smismember(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    let [key, members @ ..] = args else {
        return Err(CommandError::WrongArity("SMISMEMBER"));
    };
    if members.is_empty() {
        return Err(CommandError::WrongArity("SMISMEMBER"));
    }
    let flags = keyspace.smismember(key, members, now_ms);
    Ok(ProtocolValue::Array(Some(
        flags
            .into_iter()
            .map(|present| ProtocolValue::Integer(present as i64))
            .collect(),
    )))
}

fn cmd_sinter(
    args: &[Bytes],
    keyspace: &mut Keyspace,
    now_ms: u64,
) -> Result<ProtocolValue, CommandError> {
    if args.is_empty() {
        return Err(CommandError::WrongArity("SINTER"));
    }
    let members = keyspace.sinter(args, now_ms);
    Ok(ProtocolValue::Array(
        Some(members.into_iter().map(ProtocolValue::bulk).collect()),
    ))
}
