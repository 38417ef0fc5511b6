use meshmap_shared::{HlcTimestamp, Value};

/// Connection lifecycle as observed by subscribers. The transport owns the
/// socket; the engine owns `Syncing` (causal gap open) and `Ready`
/// (snapshot applied), and mirrors the rest from transport callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Syncing,
    Ready,
    Reconnecting,
    Error,
}

/// Classification carried on `EngineEvent::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Frame or value failed to decode
    Codec,
    /// Payload failed decryption or the key is misconfigured
    Crypto,
    /// Durable storage refused a read or write
    Storage,
    /// Well-formed message that is invalid in context
    Protocol,
}

/// Events accumulated by the engine during each public call and drained by
/// the owner via `take_events`. Emission is synchronous with the mutation
/// that caused it; persistence may still be in flight when an event is
/// observed.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A key changed, locally or remotely.
    Op {
        key: String,
        value: Value,
        local: bool,
        timestamp: HlcTimestamp,
    },
    /// Connection status changed.
    Status(ConnectionStatus),
    /// The pending-op queue grew or shrank to this size.
    QueueChange(usize),
    /// A snapshot was applied; reads now reflect the authoritative map.
    Ready,
    /// A non-fatal failure was contained.
    Error { kind: ErrorKind, detail: String },
    /// A compare-and-swap frame for the transport to forward.
    CasMessage(Vec<u8>),
    /// The causal buffer overflowed; the transport should request a fresh
    /// snapshot.
    ResyncNeeded,
}
