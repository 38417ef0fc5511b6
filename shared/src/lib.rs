//! # Meshmap Shared
//! Common functionality shared between the meshmap client engine & relay
//! tooling: the value model, the wire codec, and the hybrid logical clock.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub mod codec;

mod hlc;
mod op_hash;
mod value;

pub use codec::{
    bytes::{ByteReader, ByteWriter},
    decode_message, decode_value, encode_message, encode_value,
    envelope::{CasPayload, Message, OpPayload, SCHEMA_VERSION},
    error::CodecError,
};
pub use hlc::{corrected_wall_ms, HlcClock, HlcError, HlcTimestamp};
pub use op_hash::op_hash;
pub use value::Value;
