//! Causal-dependency barrier for remote operations.
//!
//! A remote op may name operations it depends on. Until every named
//! dependency has been observed, the op is parked here instead of being
//! merged; each delivery re-evaluates the parked set, so chains unblock in
//! cascade once the missing prefix arrives.

use std::collections::{HashSet, VecDeque};

use log::{debug, warn};

use meshmap_shared::HlcTimestamp;

/// A remote op held back until its dependencies are satisfied. Payload
/// bytes stay in their on-wire form; decryption and decoding happen at
/// delivery time.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedOp {
    pub key: String,
    pub payload: Vec<u8>,
    pub peer: String,
    pub timestamp: HlcTimestamp,
    pub deps: Vec<String>,
    pub encrypted: bool,
}

/// Outcome of submitting one remote op.
pub enum Submission {
    /// All dependencies observed; merge now.
    Deliver(BufferedOp),
    /// Parked until more operations arrive.
    Parked,
}

pub struct CausalBuffer {
    received: HashSet<String>,
    pending: VecDeque<BufferedOp>,
    max_pending: usize,
    evicted_since_drain: bool,
}

impl CausalBuffer {
    pub fn new(max_pending: usize) -> Self {
        Self {
            received: HashSet::new(),
            pending: VecDeque::new(),
            max_pending,
            evicted_since_drain: false,
        }
    }

    /// Record an operation as observed (applied remotely or generated
    /// locally). Dependencies resolve against this set.
    pub fn mark_received(&mut self, hash: String) {
        self.received.insert(hash);
    }

    pub fn has_received(&self, hash: &str) -> bool {
        self.received.contains(hash)
    }

    pub fn deps_satisfied(&self, deps: &[String]) -> bool {
        deps.iter().all(|d| self.received.contains(d))
    }

    /// Number of parked operations; non-zero means a causal gap is open.
    pub fn parked_len(&self) -> usize {
        self.pending.len()
    }

    pub fn submit(&mut self, op: BufferedOp) -> Submission {
        if self.deps_satisfied(&op.deps) {
            return Submission::Deliver(op);
        }
        debug!(
            "parking op for key `{}`: {} unmet dependencies",
            op.key,
            op.deps
                .iter()
                .filter(|d| !self.received.contains(*d))
                .count()
        );
        self.pending.push_back(op);
        if self.pending.len() > self.max_pending {
            // Oldest entry is the least likely to ever be satisfied; its
            // dependencies can only arrive through a full resync now.
            if let Some(dropped) = self.pending.pop_front() {
                warn!(
                    "causal buffer over {} entries, evicting op for key `{}`",
                    self.max_pending, dropped.key
                );
            }
            self.evicted_since_drain = true;
        }
        Submission::Parked
    }

    /// One pass over the parked set, removing every op whose dependencies
    /// are now satisfied. Callers loop: a delivered op marks new hashes as
    /// received, which may unblock earlier-parked entries.
    pub fn take_ready(&mut self) -> Vec<BufferedOp> {
        let mut ready = Vec::new();
        let mut still_parked = VecDeque::with_capacity(self.pending.len());
        for op in self.pending.drain(..) {
            if op.deps.iter().all(|d| self.received.contains(d)) {
                ready.push(op);
            } else {
                still_parked.push_back(op);
            }
        }
        self.pending = still_parked;
        ready
    }

    /// True once an eviction has happened since the last check; the engine
    /// turns this into a resync request to the transport.
    pub fn take_eviction_flag(&mut self) -> bool {
        std::mem::take(&mut self.evicted_since_drain)
    }

    /// Drop every parked op. Used when a snapshot replaces local state:
    /// parked ops predate the snapshot and their dependencies will never
    /// be individually re-delivered.
    pub fn clear_parked(&mut self) {
        self.pending.clear();
    }
}
