//! End-to-end encrypted workspaces across real frames: key holders
//! converge, outsiders and the relay learn nothing from payloads.

use meshmap_client::{EngineConfig, Value};
use meshmap_test::{assert_converged, converge, SharedStorage, TestPeer};

const KEY: [u8; 32] = [7u8; 32];

fn sealed_peer(workspace: &str) -> TestPeer {
    TestPeer::with_config(EngineConfig::new(workspace).with_encryption_key(KEY))
}

#[test]
fn encrypted_peers_converge_like_plaintext_ones() {
    let mut alice = sealed_peer("ws-sealed");
    let mut bob = sealed_peer("ws-sealed");

    alice.set("doc", Value::Str("classified".into()));
    bob.set("count", Value::Int(3));
    converge(&mut alice, &mut bob);

    assert_eq!(alice.get("doc"), Some(&Value::Str("classified".into())));
    assert_eq!(bob.get("count"), Some(&Value::Int(3)));
}

#[test]
fn concurrent_encrypted_edits_pick_one_winner() {
    let mut alice = sealed_peer("ws-sealed");
    let mut bob = sealed_peer("ws-sealed");

    alice.set("doc", Value::Str("alice's draft".into()));
    bob.set("doc", Value::Str("bob's draft".into()));
    converge(&mut alice, &mut bob);
    assert_converged(&alice, &bob);
}

#[test]
fn frames_on_the_wire_never_contain_plaintext() {
    use meshmap_client::{decode_message, Message};

    let mut alice = sealed_peer("ws-sealed");
    let secret = "do not leak";
    let frame = alice
        .engine
        .set("doc", Value::Str(secret.into()))
        .expect("frame");

    // Frame is well-formed and flagged, but the value bytes are opaque.
    match decode_message(&frame).unwrap() {
        Message::Op(op) => {
            assert!(op.encrypted);
            let needle = secret.as_bytes();
            let leaked = op
                .value
                .windows(needle.len())
                .any(|window| window == needle);
            assert!(!leaked, "plaintext leaked into the wire payload");
        }
        other => panic!("expected op frame, got {:?}", other),
    }
}

#[test]
fn encrypted_workspace_survives_full_offline_cycle() {
    use meshmap_client::SyncEngine;

    let storage = SharedStorage::new();
    {
        let mut engine = SyncEngine::new(
            EngineConfig::new("ws-sealed").with_encryption_key(KEY),
            Box::new(storage.handle()),
        )
        .unwrap();
        engine.boot();
        engine.set("doc", Value::Str("offline edit".into()));
        engine.destroy();
    }

    // Disk holds ciphertext only.
    let stored = storage.stored("doc").expect("value persisted");
    assert!(!stored
        .windows("offline edit".len())
        .any(|window| window == "offline edit".as_bytes()));

    // A restarted key holder reads it back and can still replay.
    let mut revived = TestPeer::with_storage(
        EngineConfig::new("ws-sealed").with_encryption_key(KEY),
        Box::new(storage.handle()),
    );
    assert_eq!(revived.get("doc"), Some(&Value::Str("offline edit".into())));

    let mut online = sealed_peer("ws-sealed");
    for frame in revived.engine.ops_to_send() {
        online.engine.apply_incoming(&frame);
    }
    assert_eq!(online.get("doc"), Some(&Value::Str("offline edit".into())));
}

#[test]
fn peer_without_the_key_stays_empty() {
    let mut alice = sealed_peer("ws-sealed");
    let mut outsider = TestPeer::new("ws-sealed");

    alice.set("doc", Value::Str("secret".into()));
    alice.flush_to(&mut outsider);

    assert_eq!(outsider.get("doc"), None);
    assert_eq!(outsider.engine.len(), 0);
}
