//! The synchronization engine: a replicated key→value map converging under
//! concurrent edits, partitions, and peer churn.
//!
//! Local writes are applied optimistically and queued until the relay
//! acknowledges them; remote ops pass the causal barrier, then merge by
//! last-write-wins over hybrid logical clocks (timestamp first, peer id as
//! the tie-break). The engine never blocks a caller on storage or network:
//! persistence failures are logged and in-memory state stays authoritative.
//!
//! All outward communication is pull-based. The owner calls a mutating
//! method, then drains [`take_events`](SyncEngine::take_events) and ships
//! any returned frames through the transport collaborator.

use std::collections::{HashMap, VecDeque};

use log::{debug, trace, warn};
use uuid::Uuid;

use meshmap_shared::{
    corrected_wall_ms, decode_message, decode_value, encode_message, encode_value, op_hash,
    CasPayload, HlcClock, HlcTimestamp, Message, OpPayload, Value, SCHEMA_VERSION,
};

use crate::causal::{BufferedOp, CausalBuffer, Submission};
use crate::crypto::EncryptionAdapter;
use crate::storage::StorageAdapter;

pub mod config;
pub mod event;

use config::{ConfigError, EngineConfig};
use event::{ConnectionStatus, EngineEvent, ErrorKind};

/// Durable keys under this prefix hold queued ops, not live values.
const QUEUE_PREFIX: &str = "queue::";

/// One live key in the replicated map. A `Null` value is a tombstone that
/// survives until the compactor retires it.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub value: Value,
    pub timestamp: HlcTimestamp,
    pub peer_id: String,
    /// Last on-wire ciphertext for this key; retained only under
    /// encryption so compare-and-swap can reference exact relay-side bytes.
    pub last_ciphertext: Option<Vec<u8>>,
}

/// A locally generated op awaiting relay acknowledgement. Survives process
/// restart through its durable `queue::` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOp {
    pub key: String,
    pub value: Value,
    /// Encoded (and possibly encrypted) value bytes as sent.
    pub payload: Vec<u8>,
    pub timestamp: HlcTimestamp,
    pub peer_id: String,
    /// Complete wire frame, ready for retransmission.
    pub frame: Vec<u8>,
    pub encrypted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    New,
    Booted,
    Running,
    Stopped,
}

pub struct SyncEngine {
    config: EngineConfig,
    lifecycle: Lifecycle,
    status: ConnectionStatus,
    /// Status to restore once a causal gap closes.
    resume_status: ConnectionStatus,
    state: HashMap<String, StateEntry>,
    pending: VecDeque<PendingOp>,
    causal: CausalBuffer,
    clock: HlcClock,
    clock_offset_ms: i64,
    actor: Uuid,
    peer_id: String,
    storage: Box<dyn StorageAdapter>,
    crypto: Option<EncryptionAdapter>,
    events: Vec<EngineEvent>,
}

impl SyncEngine {
    /// Configuration problems are the only errors that ever reach a
    /// caller, and they surface here, not later.
    pub fn new(
        config: EngineConfig,
        storage: Box<dyn StorageAdapter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let actor = match &config.peer_id {
            // Validated above; a parse failure here is unreachable.
            Some(peer_id) => Uuid::parse_str(peer_id)
                .map_err(|_| ConfigError::InvalidPeerId { id: peer_id.clone() })?,
            None => Uuid::new_v4(),
        };
        let peer_id = actor.simple().to_string();
        // Big-endian so numeric node order matches the hex-string order
        // used for peer-id tie-breaks.
        let bytes = actor.as_bytes();
        let node = u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let causal = CausalBuffer::new(config.max_buffered_ops);
        Ok(Self {
            causal,
            lifecycle: Lifecycle::New,
            status: ConnectionStatus::Disconnected,
            resume_status: ConnectionStatus::Disconnected,
            state: HashMap::new(),
            pending: VecDeque::new(),
            clock: HlcClock::new(node),
            clock_offset_ms: 0,
            actor,
            peer_id,
            storage,
            crypto: config.encryption_key.map(|key| EncryptionAdapter::new(&key)),
            events: Vec::new(),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Prepare storage and rehydrate persisted state. Mutations are
    /// rejected until this has run.
    pub fn boot(&mut self) {
        if self.lifecycle != Lifecycle::New {
            trace!("boot ignored: engine already booted");
            return;
        }
        if let Err(err) = self.storage.init() {
            warn!("storage init failed: {}", err);
        }
        self.lifecycle = Lifecycle::Booted;
        self.load_from_storage();
    }

    /// End the session. Mutations are rejected afterwards; state is kept
    /// readable for a final inspection.
    pub fn stop(&mut self) {
        if self.lifecycle == Lifecycle::Stopped {
            return;
        }
        self.lifecycle = Lifecycle::Stopped;
        self.set_status(ConnectionStatus::Disconnected);
        if let Err(err) = self.storage.close() {
            warn!("storage close failed: {}", err);
        }
    }

    /// Terminal: wipe in-memory state and reject everything afterwards.
    /// Durable state is left for the next engine over the same storage.
    pub fn destroy(&mut self) {
        self.stop();
        self.state.clear();
        self.pending.clear();
        self.events.clear();
    }

    /// Hand the storage adapter to a successor engine without closing it.
    pub fn into_storage(self) -> Box<dyn StorageAdapter> {
        self.storage
    }

    fn alive(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Booted | Lifecycle::Running)
    }

    // ------------------------------------------------------------------
    // Transport callbacks
    // ------------------------------------------------------------------

    pub fn on_connect(&mut self) {
        if !self.alive() {
            return;
        }
        self.lifecycle = Lifecycle::Running;
        self.set_status(ConnectionStatus::Connected);
    }

    pub fn on_disconnect(&mut self, clean: bool) {
        if !self.alive() {
            return;
        }
        self.lifecycle = Lifecycle::Booted;
        self.set_status(if clean {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Reconnecting
        });
    }

    pub fn on_snapshot(&mut self, snapshot: &[u8], server_time: u64) {
        self.load_snapshot(snapshot, Some(server_time));
    }

    /// Re-estimate the offset between relay time and local wall time.
    /// Every future HLC stamp uses the corrected time.
    pub fn on_pong(&mut self, server_time: u64) {
        if !self.alive() {
            return;
        }
        let wall = corrected_wall_ms(0);
        let offset = server_time as i64 - wall as i64;
        trace!("clock offset now {} ms", offset);
        self.clock_offset_ms = offset;
    }

    pub fn set_clock_offset(&mut self, offset_ms: i64) {
        if !self.alive() {
            return;
        }
        self.clock_offset_ms = offset_ms;
    }

    pub fn clock_offset(&self) -> i64 {
        self.clock_offset_ms
    }

    /// Dispatch one incoming frame from the transport.
    pub fn apply_incoming(&mut self, bytes: &[u8]) {
        if !self.alive() {
            return;
        }
        self.apply_incoming_inner(bytes, false)
    }

    fn apply_incoming_inner(&mut self, bytes: &[u8], unwrapped: bool) {
        let message = match decode_message(bytes) {
            Ok(message) => message,
            Err(err) => {
                self.emit_error(ErrorKind::Codec, format!("dropping frame: {}", err));
                return;
            }
        };
        match message {
            Message::Op(op) => {
                let peer = op.actor.simple().to_string();
                self.submit_remote(BufferedOp {
                    key: op.key,
                    payload: op.value,
                    peer,
                    timestamp: op.timestamp,
                    deps: op.deps,
                    encrypted: op.encrypted,
                });
            }
            Message::Init {
                schema_version,
                server_time,
                snapshot,
            } => {
                if schema_version > SCHEMA_VERSION {
                    self.emit_error(
                        ErrorKind::Protocol,
                        format!("snapshot schema {} is newer than supported", schema_version),
                    );
                    return;
                }
                self.load_snapshot(&snapshot, Some(server_time));
            }
            Message::Ping => trace!("ping from relay"),
            Message::Pong { server_time } => self.on_pong(server_time),
            Message::Cas(_) => {
                // The relay arbitrates CAS; a correction comes back as a
                // plain op, never as a CAS frame.
                self.emit_error(ErrorKind::Protocol, "relay-bound cas frame received".into());
            }
            Message::Encrypted(inner) => {
                if unwrapped {
                    self.emit_error(ErrorKind::Protocol, "nested encrypted frame".into());
                    return;
                }
                let plain = match &self.crypto {
                    Some(crypto) => crypto.decrypt(&inner).map_err(|err| err.to_string()),
                    None => Err("encrypted frame but no key configured".to_string()),
                };
                match plain {
                    Ok(plain) => self.apply_incoming_inner(&plain, true),
                    Err(detail) => self.emit_error(ErrorKind::Crypto, detail),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Local writes
    // ------------------------------------------------------------------

    /// Optimistic local write. Returns the wire frame for the transport to
    /// forward, or `None` if the engine is inert or the value failed to
    /// encode. The in-memory update is observable before this returns.
    pub fn set(&mut self, key: &str, value: Value) -> Option<Vec<u8>> {
        self.write_local(key, value)
    }

    /// Deletion is a write of `Null`: the tombstone propagates like any
    /// other op and is retired later by `compact`.
    pub fn delete(&mut self, key: &str) -> Option<Vec<u8>> {
        self.write_local(key, Value::Null)
    }

    fn write_local(&mut self, key: &str, value: Value) -> Option<Vec<u8>> {
        if !self.alive() {
            trace!("write ignored: engine not active");
            return None;
        }
        if key.is_empty() || key.starts_with(QUEUE_PREFIX) {
            warn!("refusing write to reserved or empty key `{}`", key);
            return None;
        }
        let (payload, encrypted) = self.encode_and_seal(&value)?;
        // Chain to the op currently dominating this key, so replicas that
        // missed it hold this write back instead of applying it early.
        let deps = match self.state.get(key) {
            Some(entry) if !entry.peer_id.is_empty() => {
                vec![op_hash(key, &entry.timestamp, &entry.peer_id)]
            }
            _ => Vec::new(),
        };
        let timestamp = self.commit_local(key, value.clone(), &payload, encrypted);
        let frame = encode_message(&Message::Op(OpPayload {
            actor: self.actor,
            key: key.to_string(),
            timestamp,
            value: payload.clone(),
            deps,
            encrypted,
        }));
        if self.config.debug {
            trace!("local op `{}` @ {}", key, timestamp.to_lex_string());
        }
        self.push_pending(PendingOp {
            key: key.to_string(),
            value,
            payload,
            timestamp,
            peer_id: self.peer_id.clone(),
            frame: frame.clone(),
            encrypted,
        });
        Some(frame)
    }

    /// Compare-and-swap. The local pre-check uses deep structural equality
    /// over decoded values; `expected = None` means "key must be absent"
    /// and is never coerced to or from `Null`. On success the new value is
    /// applied optimistically and a CAS frame is emitted for the relay to
    /// arbitrate; a rejection comes back as a normal remote op.
    pub fn cas(&mut self, key: &str, expected: Option<&Value>, new_value: Value) -> bool {
        if !self.alive() {
            return false;
        }
        if key.is_empty() || key.starts_with(QUEUE_PREFIX) {
            warn!("refusing cas on reserved or empty key `{}`", key);
            return false;
        }
        let matched = match (self.state.get(key), expected) {
            (None, None) => true,
            (Some(entry), Some(exp)) => entry.value == *exp,
            _ => false,
        };
        if !matched {
            debug!("cas pre-check failed for `{}`", key);
            return false;
        }
        let expected_bytes = match expected {
            None => None,
            Some(exp) => {
                if self.crypto.is_some() {
                    // Random IVs make ciphertext non-reproducible, so the
                    // relay can only compare against the exact bytes it
                    // already holds.
                    match self
                        .state
                        .get(key)
                        .and_then(|entry| entry.last_ciphertext.clone())
                    {
                        Some(ciphertext) => Some(ciphertext),
                        None => {
                            debug!("cas on `{}` lacks a retained ciphertext", key);
                            return false;
                        }
                    }
                } else {
                    match encode_value(exp) {
                        Ok(bytes) => Some(bytes),
                        Err(err) => {
                            self.emit_error(ErrorKind::Codec, err.to_string());
                            return false;
                        }
                    }
                }
            }
        };
        let Some((payload, encrypted)) = self.encode_and_seal(&new_value) else {
            return false;
        };
        let timestamp = self.commit_local(key, new_value, &payload, encrypted);
        let frame = encode_message(&Message::Cas(CasPayload {
            key: key.to_string(),
            expected: expected_bytes,
            new_value: payload,
            actor: self.actor,
            timestamp,
        }));
        self.emit(EngineEvent::CasMessage(frame));
        true
    }

    /// Encode and, when enabled, encrypt a value for the wire and storage.
    fn encode_and_seal(&mut self, value: &Value) -> Option<(Vec<u8>, bool)> {
        let plain = match encode_value(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.emit_error(ErrorKind::Codec, err.to_string());
                return None;
            }
        };
        if let Some(crypto) = &self.crypto {
            match crypto.encrypt(&plain) {
                Ok(ciphertext) => Some((ciphertext, true)),
                Err(err) => {
                    self.emit_error(ErrorKind::Crypto, err.to_string());
                    None
                }
            }
        } else {
            Some((plain, false))
        }
    }

    /// Shared tail of every optimistic local mutation: stamp, install,
    /// persist, record as observed, announce.
    fn commit_local(
        &mut self,
        key: &str,
        value: Value,
        payload: &[u8],
        encrypted: bool,
    ) -> HlcTimestamp {
        let timestamp = self.clock.now(self.clock_offset_ms);
        self.state.insert(
            key.to_string(),
            StateEntry {
                value: value.clone(),
                timestamp,
                peer_id: self.peer_id.clone(),
                last_ciphertext: encrypted.then(|| payload.to_vec()),
            },
        );
        self.causal
            .mark_received(op_hash(key, &timestamp, &self.peer_id));
        self.persist(key, payload);
        self.emit(EngineEvent::Op {
            key: key.to_string(),
            value,
            local: true,
            timestamp,
        });
        timestamp
    }

    fn push_pending(&mut self, op: PendingOp) {
        let queue_key = Self::queue_key(&op.timestamp, &op.key);
        self.persist(&queue_key, &op.frame);
        self.pending.push_back(op);
        if self.pending.len() > self.config.max_queue_size {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(
                    "pending queue over {} ops, dropping oldest (key `{}`)",
                    self.config.max_queue_size, dropped.key
                );
                let dropped_key = Self::queue_key(&dropped.timestamp, &dropped.key);
                self.remove_persisted(&dropped_key);
            }
        }
        self.emit(EngineEvent::QueueChange(self.pending.len()));
    }

    // ------------------------------------------------------------------
    // Remote operations
    // ------------------------------------------------------------------

    /// Merge one remote op. Blocked ops park in the causal buffer; payload
    /// bytes are treated as ciphertext when encryption is active.
    pub fn apply_remote(
        &mut self,
        key: &str,
        payload: &[u8],
        peer: &str,
        timestamp: HlcTimestamp,
        deps: Vec<String>,
    ) {
        if !self.alive() {
            return;
        }
        self.submit_remote(BufferedOp {
            key: key.to_string(),
            payload: payload.to_vec(),
            peer: peer.to_string(),
            timestamp,
            deps,
            encrypted: self.crypto.is_some(),
        });
    }

    fn submit_remote(&mut self, op: BufferedOp) {
        if !self.alive() {
            return;
        }
        match self.causal.submit(op) {
            Submission::Deliver(op) => {
                self.deliver(op);
                self.pump();
            }
            Submission::Parked => {
                if self.causal.take_eviction_flag() {
                    self.emit(EngineEvent::ResyncNeeded);
                }
                if self.status != ConnectionStatus::Syncing {
                    self.resume_status = self.status;
                    self.set_status(ConnectionStatus::Syncing);
                }
            }
        }
    }

    /// Re-evaluate parked ops until no more can be delivered, then close
    /// the causal gap if one was open.
    fn pump(&mut self) {
        loop {
            let ready = self.causal.take_ready();
            if ready.is_empty() {
                break;
            }
            for op in ready {
                self.deliver(op);
            }
        }
        if self.causal.parked_len() == 0 && self.status == ConnectionStatus::Syncing {
            let resume = self.resume_status;
            self.set_status(resume);
        }
    }

    /// Decrypt, decode, then LWW-merge one causally ready remote op.
    fn deliver(&mut self, op: BufferedOp) {
        let BufferedOp {
            key,
            payload,
            peer,
            timestamp,
            deps: _,
            encrypted,
        } = op;

        let plain = if encrypted {
            let result = match &self.crypto {
                Some(crypto) => crypto.decrypt(&payload).map_err(|err| err.to_string()),
                None => Err("encrypted op but no encryption key configured".to_string()),
            };
            match result {
                Ok(plain) => plain,
                Err(detail) => {
                    self.emit_error(
                        ErrorKind::Crypto,
                        format!("dropping op for `{}`: {}", key, detail),
                    );
                    return;
                }
            }
        } else {
            payload.clone()
        };

        let value = match decode_value(&plain) {
            Ok(value) => value,
            Err(err) => {
                self.emit_error(
                    ErrorKind::Codec,
                    format!("dropping op for `{}`: {}", key, err),
                );
                return;
            }
        };

        // The op is now observed whether or not it wins the merge; a
        // dominated op still satisfies dependencies that name it.
        self.clock.observe(&timestamp, self.clock_offset_ms);
        self.causal
            .mark_received(op_hash(&key, &timestamp, &peer));

        let accept = match self.state.get(&key) {
            None => true,
            Some(current) => {
                current.timestamp < timestamp
                    || (current.timestamp == timestamp && current.peer_id < peer)
            }
        };
        if !accept {
            trace!("op for `{}` is dominated, ignoring", key);
            return;
        }

        self.state.insert(
            key.clone(),
            StateEntry {
                value: value.clone(),
                timestamp,
                peer_id: peer,
                last_ciphertext: encrypted.then(|| payload.clone()),
            },
        );
        self.persist(&key, &payload);
        self.emit(EngineEvent::Op {
            key,
            value,
            local: false,
            timestamp,
        });
    }

    // ------------------------------------------------------------------
    // Persistence & snapshots
    // ------------------------------------------------------------------

    /// Rehydrate the state map and pending queue from storage. Live
    /// entries come back at the base timestamp so any op observed over the
    /// wire supersedes them; the queue is rebuilt in timestamp order
    /// because the durable key embeds the lex-ordered HLC.
    pub fn load_from_storage(&mut self) {
        if !self.alive() {
            return;
        }
        let scanned = match self.storage.scan_prefix("") {
            Ok(entries) => entries,
            Err(err) => {
                self.emit_error(ErrorKind::Storage, format!("rehydration scan failed: {}", err));
                return;
            }
        };
        let mut live = 0usize;
        for (key, bytes) in scanned {
            if key.starts_with(QUEUE_PREFIX) {
                self.restore_pending(&bytes);
            } else {
                match self.decode_stored(&bytes) {
                    Ok((value, last_ciphertext)) => {
                        self.state.insert(
                            key,
                            StateEntry {
                                value,
                                timestamp: HlcTimestamp::BASE,
                                peer_id: String::new(),
                                last_ciphertext,
                            },
                        );
                        live += 1;
                    }
                    Err(detail) => {
                        self.emit_error(
                            ErrorKind::Codec,
                            format!("skipping stored entry `{}`: {}", key, detail),
                        );
                    }
                }
            }
        }
        debug!(
            "rehydrated {} live entries and {} pending ops for workspace `{}`",
            live,
            self.pending.len(),
            self.config.workspace_id
        );
        if !self.pending.is_empty() {
            self.emit(EngineEvent::QueueChange(self.pending.len()));
        }
    }

    fn decode_stored(&self, bytes: &[u8]) -> Result<(Value, Option<Vec<u8>>), String> {
        match &self.crypto {
            Some(crypto) => {
                let plain = crypto.decrypt(bytes).map_err(|err| err.to_string())?;
                let value = decode_value(&plain).map_err(|err| err.to_string())?;
                Ok((value, Some(bytes.to_vec())))
            }
            None => {
                let value = decode_value(bytes).map_err(|err| err.to_string())?;
                Ok((value, None))
            }
        }
    }

    fn restore_pending(&mut self, frame: &[u8]) {
        let op = match decode_message(frame) {
            Ok(Message::Op(op)) => op,
            Ok(_) | Err(_) => {
                warn!("skipping malformed queue entry");
                return;
            }
        };
        let plain = if op.encrypted {
            let result = match &self.crypto {
                Some(crypto) => crypto.decrypt(&op.value).map_err(|err| err.to_string()),
                None => Err("encrypted queue entry but no key configured".to_string()),
            };
            match result {
                Ok(plain) => plain,
                Err(detail) => {
                    warn!("skipping undecryptable queue entry: {}", detail);
                    return;
                }
            }
        } else {
            op.value.clone()
        };
        let value = match decode_value(&plain) {
            Ok(value) => value,
            Err(err) => {
                warn!("skipping undecodable queue entry: {}", err);
                return;
            }
        };
        // Own ops count as observed even across a restart.
        self.causal
            .mark_received(op_hash(&op.key, &op.timestamp, &op.actor.simple().to_string()));
        self.clock.observe(&op.timestamp, self.clock_offset_ms);
        self.pending.push_back(PendingOp {
            key: op.key,
            value,
            payload: op.value,
            timestamp: op.timestamp,
            peer_id: op.actor.simple().to_string(),
            frame: frame.to_vec(),
            encrypted: op.encrypted,
        });
    }

    /// Replace local state with an authoritative relay snapshot, then
    /// replay still-pending local ops on top so optimistic writes survive.
    pub fn load_snapshot(&mut self, snapshot: &[u8], server_time: Option<u64>) {
        if !self.alive() {
            return;
        }
        let map = match decode_value(snapshot) {
            Ok(Value::Map(map)) => map,
            Ok(_) => {
                self.emit_error(ErrorKind::Codec, "snapshot is not a map".into());
                return;
            }
            Err(err) => {
                self.emit_error(ErrorKind::Codec, format!("snapshot decode failed: {}", err));
                return;
            }
        };
        if let Err(err) = self.storage.clear_all() {
            warn!("storage clear before snapshot failed: {}", err);
        }
        self.state.clear();
        self.causal.clear_parked();

        let base = HlcTimestamp::base_at(server_time.unwrap_or(1));
        for (key, value) in map {
            let Some((payload, encrypted)) = self.encode_and_seal(&value) else {
                continue;
            };
            self.persist(&key, &payload);
            self.state.insert(
                key.clone(),
                StateEntry {
                    value: value.clone(),
                    timestamp: base,
                    peer_id: String::new(),
                    last_ciphertext: encrypted.then(|| payload.clone()),
                },
            );
            self.emit(EngineEvent::Op {
                key,
                value,
                local: false,
                timestamp: base,
            });
        }

        let replay: Vec<PendingOp> = self.pending.iter().cloned().collect();
        for op in replay {
            self.state.insert(
                op.key.clone(),
                StateEntry {
                    value: op.value.clone(),
                    timestamp: op.timestamp,
                    peer_id: op.peer_id.clone(),
                    last_ciphertext: op.encrypted.then(|| op.payload.clone()),
                },
            );
            self.persist(&op.key, &op.payload);
            let queue_key = Self::queue_key(&op.timestamp, &op.key);
            self.persist(&queue_key, &op.frame);
            self.emit(EngineEvent::Op {
                key: op.key,
                value: op.value,
                local: true,
                timestamp: op.timestamp,
            });
        }

        self.set_status(ConnectionStatus::Ready);
        self.emit(EngineEvent::Ready);
    }

    /// Retire tombstones older than the stability window from both the
    /// state map and storage. Live entries are never touched.
    pub fn compact(&mut self) {
        if !self.alive() {
            return;
        }
        let now = corrected_wall_ms(self.clock_offset_ms);
        let cutoff = now.saturating_sub(self.config.stability_window_ms);
        let expired: Vec<String> = self
            .state
            .iter()
            .filter(|(_, entry)| entry.value.is_null() && entry.timestamp.physical < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            debug!("compacting tombstone `{}`", key);
            self.state.remove(&key);
            self.remove_persisted(&key);
        }
    }

    // ------------------------------------------------------------------
    // Pending queue
    // ------------------------------------------------------------------

    /// Frames for the transport to (re)transmit, oldest first. Does not
    /// drain: the queue empties via `drain_pending` or a snapshot cycle.
    pub fn ops_to_send(&self) -> Vec<Vec<u8>> {
        self.pending.iter().map(|op| op.frame.clone()).collect()
    }

    /// Return and empty the pending queue, removing the durable entries.
    pub fn drain_pending(&mut self) -> Vec<PendingOp> {
        if !self.alive() {
            return Vec::new();
        }
        let drained: Vec<PendingOp> = self.pending.drain(..).collect();
        for op in &drained {
            let queue_key = Self::queue_key(&op.timestamp, &op.key);
            self.remove_persisted(&queue_key);
        }
        if !drained.is_empty() {
            self.emit(EngineEvent::QueueChange(0));
        }
        drained
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current value for a key. Tombstones read as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state
            .get(key)
            .filter(|entry| !entry.value.is_null())
            .map(|entry| &entry.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Full entry including ordering metadata and tombstones.
    pub fn entry(&self, key: &str) -> Option<&StateEntry> {
        self.state.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.state
            .iter()
            .filter(|(_, entry)| !entry.value.is_null())
            .map(|(key, _)| key.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.state
            .iter()
            .filter(|(_, entry)| !entry.value.is_null())
            .map(|(key, entry)| (key.as_str(), &entry.value))
    }

    /// Number of live (non-tombstone) keys.
    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn workspace_id(&self) -> &str {
        &self.config.workspace_id
    }

    /// Stable key identifier when encryption is active; peers compare
    /// these to detect mismatched keys before exchanging ops.
    pub fn key_id(&self) -> Option<&str> {
        self.crypto.as_ref().map(|crypto| crypto.key_id())
    }

    /// Drain the events accumulated since the last call, in emission
    /// order. Persistence may still be in flight for the newest of them.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn queue_key(timestamp: &HlcTimestamp, key: &str) -> String {
        format!("{}{}::{}", QUEUE_PREFIX, timestamp.to_lex_string(), key)
    }

    fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    fn emit_error(&mut self, kind: ErrorKind, detail: String) {
        warn!("{:?} failure: {}", kind, detail);
        self.emit(EngineEvent::Error { kind, detail });
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.emit(EngineEvent::Status(status));
        }
    }

    fn persist(&mut self, key: &str, bytes: &[u8]) {
        if let Err(err) = self.storage.set(key, bytes) {
            warn!("persist of `{}` failed: {}", key, err);
        }
    }

    fn remove_persisted(&mut self, key: &str) {
        if let Err(err) = self.storage.delete(key) {
            warn!("delete of `{}` failed: {}", key, err);
        }
    }
}
