use meshmap_client::{EngineConfig, EngineEvent, StorageAdapter, SyncEngine};
use meshmap_shared::Value;

use super::SharedStorage;

/// One peer in a simulated workspace: an engine plus an outbox standing in
/// for the transport. Frames written here are delivered only when a test
/// explicitly flushes them, which is how partition and reordering
/// scenarios are staged.
pub struct TestPeer {
    pub engine: SyncEngine,
    outbox: Vec<Vec<u8>>,
}

impl TestPeer {
    pub fn new(workspace: &str) -> Self {
        Self::with_storage(EngineConfig::new(workspace), Box::new(SharedStorage::new()))
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_storage(config, Box::new(SharedStorage::new()))
    }

    pub fn with_storage(config: EngineConfig, storage: Box<dyn StorageAdapter>) -> Self {
        let mut engine = SyncEngine::new(config, storage).expect("valid test config");
        engine.boot();
        Self {
            engine,
            outbox: Vec::new(),
        }
    }

    /// Local write, capturing the frame for later delivery.
    pub fn set(&mut self, key: &str, value: Value) {
        if let Some(frame) = self.engine.set(key, value) {
            self.outbox.push(frame);
        }
    }

    pub fn delete(&mut self, key: &str) {
        if let Some(frame) = self.engine.delete(key) {
            self.outbox.push(frame);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.engine.get(key)
    }

    /// Deliver everything queued in this peer's outbox to `other`.
    pub fn flush_to(&mut self, other: &mut TestPeer) {
        for frame in self.outbox.drain(..) {
            other.engine.apply_incoming(&frame);
        }
    }

    /// Deliver queued frames in reverse order, simulating reordering in
    /// transit.
    pub fn flush_to_reversed(&mut self, other: &mut TestPeer) {
        for frame in self.outbox.drain(..).rev() {
            other.engine.apply_incoming(&frame);
        }
    }

    /// Drop queued frames on the floor, simulating loss.
    pub fn drop_outbox(&mut self) {
        self.outbox.clear();
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn events(&mut self) -> Vec<EngineEvent> {
        self.engine.take_events()
    }
}

/// Deliver every queued frame in both directions until both outboxes are
/// empty, then assert the two engines hold identical live maps.
pub fn converge(a: &mut TestPeer, b: &mut TestPeer) {
    while a.outbox_len() > 0 || b.outbox_len() > 0 {
        a.flush_to(b);
        b.flush_to(a);
    }
    assert_converged(a, b);
}

pub fn assert_converged(a: &TestPeer, b: &TestPeer) {
    let mut left: Vec<(String, Value)> = a
        .engine
        .entries()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    let mut right: Vec<(String, Value)> = b
        .engine
        .entries()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    left.sort_by(|x, y| x.0.cmp(&y.0));
    right.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(left, right, "replicas diverged");
}
