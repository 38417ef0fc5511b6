//! Self-describing MsgPack encoding of the value model.
//!
//! Encoding goes through `rmp`'s writers so the output is always canonical
//! MsgPack. Decoding dispatches on the raw marker byte and reads payloads
//! from a [`ByteReader`], so malformed input of any shape degrades to a
//! [`CodecError`] instead of a panic.

use std::collections::BTreeMap;
use std::fmt::Display;

use rmp::encode::{
    write_array_len, write_bin, write_bool, write_f64, write_map_len, write_nil, write_sint,
    write_str,
};
use rmp::Marker;

use super::bytes::ByteReader;
use super::error::CodecError;
use crate::value::Value;

/// Recursion bound for untrusted input.
const MAX_DEPTH: usize = 64;
/// Sanity cap on a single string/binary field.
const MAX_BYTES_LEN: usize = 16 * 1024 * 1024;
/// Sanity cap on declared array/map element counts.
const MAX_CONTAINER_LEN: usize = 1 << 20;

fn enc_err<E: Display>(err: E) -> CodecError {
    CodecError::Encode {
        detail: err.to_string(),
    }
}

pub fn encode_value(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode_into(value, &mut out)?;
    Ok(out)
}

fn encode_into(value: &Value, out: &mut Vec<u8>) -> Result<(), CodecError> {
    match value {
        Value::Null => write_nil(out).map_err(enc_err)?,
        Value::Bool(b) => write_bool(out, *b).map_err(enc_err)?,
        Value::Int(i) => {
            write_sint(out, *i).map_err(enc_err)?;
        }
        Value::Float(f) => write_f64(out, *f).map_err(enc_err)?,
        Value::Str(s) => write_str(out, s).map_err(enc_err)?,
        Value::Bytes(b) => write_bin(out, b).map_err(enc_err)?,
        Value::List(items) => {
            write_array_len(out, items.len() as u32).map_err(enc_err)?;
            for item in items {
                encode_into(item, out)?;
            }
        }
        Value::Map(entries) => {
            write_map_len(out, entries.len() as u32).map_err(enc_err)?;
            for (key, item) in entries {
                write_str(out, key).map_err(enc_err)?;
                encode_into(item, out)?;
            }
        }
    }
    Ok(())
}

pub fn decode_value(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut reader = ByteReader::new(bytes);
    let value = decode_one(&mut reader, 0)?;
    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: reader.remaining(),
        });
    }
    Ok(value)
}

fn checked_len(len: usize, limit: usize) -> Result<usize, CodecError> {
    if len > limit {
        return Err(CodecError::LengthOverflow { len, limit });
    }
    Ok(len)
}

fn decode_one(r: &mut ByteReader<'_>, depth: usize) -> Result<Value, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::DepthExceeded { limit: MAX_DEPTH });
    }
    let marker_byte = r.read_u8()?;
    let value = match Marker::from_u8(marker_byte) {
        Marker::Null => Value::Null,
        Marker::True => Value::Bool(true),
        Marker::False => Value::Bool(false),

        Marker::FixPos(n) => Value::Int(i64::from(n)),
        Marker::FixNeg(n) => Value::Int(i64::from(n)),
        Marker::U8 => Value::Int(i64::from(r.read_u8()?)),
        Marker::U16 => Value::Int(i64::from(r.read_u16_be()?)),
        Marker::U32 => Value::Int(i64::from(r.read_u32_be()?)),
        Marker::U64 => {
            let raw = r.read_u64_be()?;
            i64::try_from(raw)
                .map(Value::Int)
                .map_err(|_| CodecError::IntegerOverflow { value: raw })?
        }
        Marker::I8 => Value::Int(i64::from(r.read_u8()? as i8)),
        Marker::I16 => Value::Int(i64::from(r.read_u16_be()? as i16)),
        Marker::I32 => Value::Int(i64::from(r.read_u32_be()? as i32)),
        Marker::I64 => Value::Int(r.read_u64_be()? as i64),

        Marker::F32 => Value::Float(f64::from(f32::from_bits(r.read_u32_be()?))),
        Marker::F64 => Value::Float(f64::from_bits(r.read_u64_be()?)),

        Marker::FixStr(len) => decode_str(r, len as usize)?,
        Marker::Str8 => {
            let len = r.read_u8()? as usize;
            decode_str(r, len)?
        }
        Marker::Str16 => {
            let len = r.read_u16_be()? as usize;
            decode_str(r, len)?
        }
        Marker::Str32 => {
            let len = r.read_u32_be()? as usize;
            decode_str(r, len)?
        }

        Marker::Bin8 => {
            let len = r.read_u8()? as usize;
            decode_bin(r, len)?
        }
        Marker::Bin16 => {
            let len = r.read_u16_be()? as usize;
            decode_bin(r, len)?
        }
        Marker::Bin32 => {
            let len = r.read_u32_be()? as usize;
            decode_bin(r, len)?
        }

        Marker::FixArray(len) => decode_list(r, len as usize, depth)?,
        Marker::Array16 => {
            let len = r.read_u16_be()? as usize;
            decode_list(r, len, depth)?
        }
        Marker::Array32 => {
            let len = r.read_u32_be()? as usize;
            decode_list(r, len, depth)?
        }

        Marker::FixMap(len) => decode_map(r, len as usize, depth)?,
        Marker::Map16 => {
            let len = r.read_u16_be()? as usize;
            decode_map(r, len, depth)?
        }
        Marker::Map32 => {
            let len = r.read_u32_be()? as usize;
            decode_map(r, len, depth)?
        }

        _ => {
            return Err(CodecError::UnsupportedMarker {
                marker: marker_byte,
            })
        }
    };
    Ok(value)
}

fn decode_str(r: &mut ByteReader<'_>, len: usize) -> Result<Value, CodecError> {
    let len = checked_len(len, MAX_BYTES_LEN)?;
    Ok(Value::Str(r.read_str(len)?))
}

fn decode_bin(r: &mut ByteReader<'_>, len: usize) -> Result<Value, CodecError> {
    let len = checked_len(len, MAX_BYTES_LEN)?;
    Ok(Value::Bytes(r.read_bytes(len)?.to_vec()))
}

fn decode_list(r: &mut ByteReader<'_>, len: usize, depth: usize) -> Result<Value, CodecError> {
    let len = checked_len(len, MAX_CONTAINER_LEN)?;
    let mut items = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        items.push(decode_one(r, depth + 1)?);
    }
    Ok(Value::List(items))
}

fn decode_map(r: &mut ByteReader<'_>, len: usize, depth: usize) -> Result<Value, CodecError> {
    let len = checked_len(len, MAX_CONTAINER_LEN)?;
    let mut entries = BTreeMap::new();
    for _ in 0..len {
        let key = match decode_one(r, depth + 1)? {
            Value::Str(s) => s,
            _ => return Err(CodecError::NonStringKey),
        };
        let value = decode_one(r, depth + 1)?;
        entries.insert(key, value);
    }
    Ok(Value::Map(entries))
}
