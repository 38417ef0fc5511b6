//! # Meshmap Client
//! Provides the client-side synchronization core for a replicated
//! per-workspace key/value map: optimistic local writes with a durable
//! offline queue, last-write-wins merge ordered by hybrid logical clocks,
//! a causal-dependency barrier for out-of-order remote operations, periodic
//! tombstone compaction, and optional end-to-end payload encryption.
//!
//! The engine owns no sockets. A transport collaborator feeds it incoming
//! frames via [`SyncEngine::apply_incoming`] and pulls outgoing frames and
//! [`EngineEvent`]s after each call.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

mod causal;
mod crypto;
mod engine;
mod storage;

pub use causal::{BufferedOp, CausalBuffer};
pub use crypto::{CryptoError, EncryptionAdapter};
pub use engine::{
    config::{ConfigError, EngineConfig},
    event::{ConnectionStatus, EngineEvent, ErrorKind},
    PendingOp, StateEntry, SyncEngine,
};
pub use storage::{memory::MemoryStorage, StorageAdapter, StorageError};

cfg_if! {
    if #[cfg(feature = "sled_storage")] {
        pub use storage::sled_store::SledStorage;
    }
}

pub use meshmap_shared::{
    corrected_wall_ms, decode_message, decode_value, encode_message, encode_value, op_hash,
    CasPayload, CodecError, HlcClock, HlcError, HlcTimestamp, Message, OpPayload, Value,
    SCHEMA_VERSION,
};
