//! Offline-first flows: a peer that edits while disconnected, restarts,
//! and then replays its queue into the workspace must lose nothing.

use meshmap_client::{EngineConfig, SyncEngine, Value};
use meshmap_test::{assert_converged, SharedStorage, TestPeer};

#[test]
fn offline_edits_replay_after_restart_and_reconnect() {
    let storage = SharedStorage::new();

    // Session one: edits while disconnected, then the process dies.
    {
        let mut engine = SyncEngine::new(
            EngineConfig::new("ws-replay"),
            Box::new(storage.handle()),
        )
        .unwrap();
        engine.boot();
        engine.set("note", Value::Str("draft one".into()));
        engine.set("note", Value::Str("draft two".into()));
        engine.set("other", Value::Int(5));
        engine.destroy();
    }

    // Session two: rehydrate and push the queue to a fresh peer, as the
    // transport would on reconnect.
    let mut revived = TestPeer::with_storage(
        EngineConfig::new("ws-replay"),
        Box::new(storage.handle()),
    );
    assert_eq!(revived.engine.pending_len(), 3);
    assert_eq!(revived.get("note"), Some(&Value::Str("draft two".into())));

    let mut online = TestPeer::new("ws-replay");
    for frame in revived.engine.ops_to_send() {
        online.engine.apply_incoming(&frame);
    }

    assert_eq!(online.get("note"), Some(&Value::Str("draft two".into())));
    assert_eq!(online.get("other"), Some(&Value::Int(5)));
    assert_converged(&revived, &online);
}

#[test]
fn acknowledged_queue_does_not_replay_again() {
    let storage = SharedStorage::new();

    let mut engine = SyncEngine::new(
        EngineConfig::new("ws-replay"),
        Box::new(storage.handle()),
    )
    .unwrap();
    engine.boot();
    engine.set("k", Value::Int(1));

    // The relay acknowledged everything; the transport drains the queue.
    let drained = engine.drain_pending();
    assert_eq!(drained.len(), 1);
    engine.destroy();

    let mut second = SyncEngine::new(
        EngineConfig::new("ws-replay"),
        Box::new(storage.handle()),
    )
    .unwrap();
    second.boot();
    assert_eq!(second.pending_len(), 0);
    assert_eq!(second.ops_to_send().len(), 0);
    // The value itself was not lost.
    assert_eq!(second.get("k"), Some(&Value::Int(1)));
}

#[test]
fn snapshot_on_reconnect_preserves_unacked_queue() {
    use meshmap_client::{encode_message, encode_value, Message, SCHEMA_VERSION};
    use std::collections::BTreeMap;

    let mut peer = TestPeer::new("ws-replay");
    peer.set("mine", Value::Str("local edit".into()));

    // Reconnect: the relay's init snapshot does not yet contain the edit.
    peer.engine.on_connect();
    let mut map = BTreeMap::new();
    map.insert("server".to_string(), Value::Int(1));
    map.insert("mine".to_string(), Value::Str("stale".into()));
    let frame = encode_message(&Message::Init {
        schema_version: SCHEMA_VERSION,
        server_time: 1_700_000_000_000,
        snapshot: encode_value(&Value::Map(map)).unwrap(),
    });
    peer.engine.apply_incoming(&frame);

    // The optimistic edit still wins locally and is still queued.
    assert_eq!(peer.get("mine"), Some(&Value::Str("local edit".into())));
    assert_eq!(peer.get("server"), Some(&Value::Int(1)));
    assert_eq!(peer.engine.pending_len(), 1);
}

#[test]
fn storage_write_pattern_is_value_plus_queue_entry() {
    let storage = SharedStorage::new();
    let mut engine = SyncEngine::new(
        EngineConfig::new("ws-replay"),
        Box::new(storage.handle()),
    )
    .unwrap();
    engine.boot();
    engine.set("k", Value::Int(1));

    let log = storage.call_log();
    assert!(log.contains(&"set k".to_string()));
    assert!(log.iter().any(|call| call.starts_with("set queue::")));
}
