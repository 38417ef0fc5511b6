use crate::hlc::HlcTimestamp;

/// Canonical identity of an operation, used both when recording what has
/// been observed and when listing dependencies on the wire.
///
/// The timestamp is rendered in its fixed-width lexicographic form, so the
/// two rightmost fields always have a known shape; a `:` inside the key
/// cannot produce the same string as a different operation.
pub fn op_hash(key: &str, timestamp: &HlcTimestamp, peer: &str) -> String {
    format!("{}:{}:{}", key, timestamp.to_lex_string(), peer)
}
