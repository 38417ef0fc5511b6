//! Helpers shared by the engine integration tests.
#![allow(dead_code)]

use meshmap_client::{
    EngineConfig, HlcTimestamp, MemoryStorage, SyncEngine, Value,
};

/// Booted engine over fresh in-memory storage.
pub fn engine(workspace: &str) -> SyncEngine {
    let mut engine = SyncEngine::new(
        EngineConfig::new(workspace),
        Box::new(MemoryStorage::new()),
    )
    .expect("valid config");
    engine.boot();
    engine
}

pub fn engine_with_config(config: EngineConfig) -> SyncEngine {
    let mut engine =
        SyncEngine::new(config, Box::new(MemoryStorage::new())).expect("valid config");
    engine.boot();
    engine
}

/// Codec bytes for a value, as a remote peer would put them on the wire.
pub fn enc(value: &Value) -> Vec<u8> {
    meshmap_client::encode_value(value).expect("encodable test value")
}

/// Timestamp with a bare physical component, logical and node zeroed.
pub fn ts(physical: u64) -> HlcTimestamp {
    HlcTimestamp::new(physical, 0, 0)
}
