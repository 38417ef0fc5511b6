//! Tagged wire envelope: `[tag: u8 | payload_len: u32 LE | payload]`.
//!
//! One message per frame. The transport owns framing across the socket;
//! this layer only defines the byte layout of a single message and must
//! tolerate arbitrary garbage without panicking.

use log::debug;
use uuid::Uuid;

use super::bytes::{ByteReader, ByteWriter};
use super::error::CodecError;
use crate::hlc::HlcTimestamp;

/// Bumped when the snapshot layout changes incompatibly.
pub const SCHEMA_VERSION: u16 = 1;

const TAG_OP: u8 = 1;
const TAG_INIT: u8 = 4;
const TAG_PING: u8 = 5;
const TAG_PONG: u8 = 6;
const TAG_CAS: u8 = 7;
const TAG_ENCRYPTED: u8 = 8;

/// Op flag bit: value bytes are ciphertext.
const FLAG_ENCRYPTED: u8 = 0b0000_0001;

/// Sanity cap on any single length-prefixed field.
const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;
/// Sanity cap on the dependency list of one op.
const MAX_DEPS: usize = 4096;

/// A replicated write: one key, its encoded value, and the ordering and
/// causality metadata needed to merge it anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct OpPayload {
    pub actor: Uuid,
    pub key: String,
    pub timestamp: HlcTimestamp,
    pub value: Vec<u8>,
    pub deps: Vec<String>,
    pub encrypted: bool,
}

/// A compare-and-swap request; the relay is the arbiter.
#[derive(Debug, Clone, PartialEq)]
pub struct CasPayload {
    pub key: String,
    pub expected: Option<Vec<u8>>,
    pub new_value: Vec<u8>,
    pub actor: Uuid,
    pub timestamp: HlcTimestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Op(OpPayload),
    Init {
        schema_version: u16,
        server_time: u64,
        snapshot: Vec<u8>,
    },
    Ping,
    Pong {
        server_time: u64,
    },
    Cas(CasPayload),
    Encrypted(Vec<u8>),
}

pub fn encode_message(message: &Message) -> Vec<u8> {
    let (tag, payload) = match message {
        Message::Op(op) => (TAG_OP, encode_op(op)),
        Message::Init {
            schema_version,
            server_time,
            snapshot,
        } => {
            let mut w = ByteWriter::with_capacity(snapshot.len() + 14);
            w.write_u16_le(*schema_version);
            w.write_u64_le(*server_time);
            w.write_sized(snapshot);
            (TAG_INIT, w.into_bytes())
        }
        Message::Ping => (TAG_PING, Vec::new()),
        Message::Pong { server_time } => {
            let mut w = ByteWriter::with_capacity(8);
            w.write_u64_le(*server_time);
            (TAG_PONG, w.into_bytes())
        }
        Message::Cas(cas) => (TAG_CAS, encode_cas(cas)),
        Message::Encrypted(bytes) => (TAG_ENCRYPTED, bytes.clone()),
    };

    let mut out = ByteWriter::with_capacity(payload.len() + 5);
    out.write_u8(tag);
    out.write_sized(&payload);
    out.into_bytes()
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, CodecError> {
    let mut r = ByteReader::new(bytes);
    let tag = r.read_u8()?;
    let payload_len = checked(r.read_u32_le()? as usize, MAX_FIELD_LEN)?;
    let payload = r.read_bytes(payload_len)?;
    if !r.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: r.remaining(),
        });
    }

    let mut p = ByteReader::new(payload);
    let message = match tag {
        TAG_OP => Message::Op(decode_op(&mut p)?),
        TAG_INIT => {
            let schema_version = p.read_u16_le()?;
            let server_time = p.read_u64_le()?;
            let snap_len = checked(p.read_u32_le()? as usize, MAX_FIELD_LEN)?;
            let snapshot = p.read_bytes(snap_len)?.to_vec();
            Message::Init {
                schema_version,
                server_time,
                snapshot,
            }
        }
        TAG_PING => Message::Ping,
        TAG_PONG => Message::Pong {
            server_time: p.read_u64_le()?,
        },
        TAG_CAS => Message::Cas(decode_cas(&mut p)?),
        TAG_ENCRYPTED => Message::Encrypted(p.read_bytes(p.remaining())?.to_vec()),
        other => {
            debug!("rejecting frame with unknown tag {}", other);
            return Err(CodecError::UnknownTag { tag: other });
        }
    };

    if !p.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: p.remaining(),
        });
    }
    Ok(message)
}

/// Op payload: `flags: u8` then the manual binary blob
/// `[actor(16) | key_len | key | hlc(16) | val_len | val | deps_count |
/// (dep_len | dep)*]`, all integer fields little-endian.
fn encode_op(op: &OpPayload) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(op.key.len() + op.value.len() + 64);
    w.write_u8(if op.encrypted { FLAG_ENCRYPTED } else { 0 });
    w.write_bytes(op.actor.as_bytes());
    w.write_sized(op.key.as_bytes());
    w.write_bytes(&op.timestamp.to_bytes());
    w.write_sized(&op.value);
    w.write_u32_le(op.deps.len() as u32);
    for dep in &op.deps {
        w.write_sized(dep.as_bytes());
    }
    w.into_bytes()
}

fn decode_op(p: &mut ByteReader<'_>) -> Result<OpPayload, CodecError> {
    let flags = p.read_u8()?;
    let actor = read_uuid(p)?;
    let key_len = checked(p.read_u32_le()? as usize, MAX_FIELD_LEN)?;
    let key = p.read_str(key_len)?;
    let timestamp = read_hlc(p)?;
    let val_len = checked(p.read_u32_le()? as usize, MAX_FIELD_LEN)?;
    let value = p.read_bytes(val_len)?.to_vec();
    let deps_count = checked(p.read_u32_le()? as usize, MAX_DEPS)?;
    let mut deps = Vec::with_capacity(deps_count);
    for _ in 0..deps_count {
        let dep_len = checked(p.read_u32_le()? as usize, MAX_FIELD_LEN)?;
        deps.push(p.read_str(dep_len)?);
    }
    Ok(OpPayload {
        actor,
        key,
        timestamp,
        value,
        deps,
        encrypted: flags & FLAG_ENCRYPTED != 0,
    })
}

fn encode_cas(cas: &CasPayload) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(cas.key.len() + cas.new_value.len() + 64);
    w.write_sized(cas.key.as_bytes());
    match &cas.expected {
        Some(expected) => {
            w.write_u8(1);
            w.write_sized(expected);
        }
        None => w.write_u8(0),
    }
    w.write_sized(&cas.new_value);
    w.write_bytes(cas.actor.as_bytes());
    w.write_bytes(&cas.timestamp.to_bytes());
    w.into_bytes()
}

fn decode_cas(p: &mut ByteReader<'_>) -> Result<CasPayload, CodecError> {
    let key_len = checked(p.read_u32_le()? as usize, MAX_FIELD_LEN)?;
    let key = p.read_str(key_len)?;
    let expected = match p.read_u8()? {
        0 => None,
        _ => {
            let exp_len = checked(p.read_u32_le()? as usize, MAX_FIELD_LEN)?;
            Some(p.read_bytes(exp_len)?.to_vec())
        }
    };
    let new_len = checked(p.read_u32_le()? as usize, MAX_FIELD_LEN)?;
    let new_value = p.read_bytes(new_len)?.to_vec();
    let actor = read_uuid(p)?;
    let timestamp = read_hlc(p)?;
    Ok(CasPayload {
        key,
        expected,
        new_value,
        actor,
        timestamp,
    })
}

fn read_uuid(p: &mut ByteReader<'_>) -> Result<Uuid, CodecError> {
    let raw = p.read_bytes(16)?;
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(raw);
    Ok(Uuid::from_bytes(bytes))
}

fn read_hlc(p: &mut ByteReader<'_>) -> Result<HlcTimestamp, CodecError> {
    let raw = p.read_bytes(16)?;
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(raw);
    Ok(HlcTimestamp::from_bytes(&bytes))
}

fn checked(len: usize, limit: usize) -> Result<usize, CodecError> {
    if len > limit {
        return Err(CodecError::LengthOverflow { len, limit });
    }
    Ok(len)
}
