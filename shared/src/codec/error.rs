use thiserror::Error;

/// Errors surfaced while encoding or decoding wire data.
///
/// Decoders return these for any truncated, ill-typed, oversized, or
/// unknown-tag input; they must never panic on untrusted bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended before the announced structure was complete
    #[error("unexpected end of input at byte {at}")]
    Truncated { at: usize },

    /// Envelope carried a tag this peer does not understand
    #[error("unknown message tag {tag}")]
    UnknownTag { tag: u8 },

    /// A MsgPack marker outside the supported value model (ext, reserved)
    #[error("unsupported marker {marker:#04x} in value encoding")]
    UnsupportedMarker { marker: u8 },

    /// Value nesting deeper than the decoder is willing to follow
    #[error("value nesting exceeds depth limit of {limit}")]
    DepthExceeded { limit: usize },

    /// Map key was not a string
    #[error("map key must be a string")]
    NonStringKey,

    /// An unsigned integer too large for the signed value model
    #[error("integer {value} does not fit the value model")]
    IntegerOverflow { value: u64 },

    /// A string field held invalid UTF-8
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// Input continued past the end of the decoded structure
    #[error("trailing {count} bytes after decoded structure")]
    TrailingBytes { count: usize },

    /// A declared length exceeds the sanity bound for that field
    #[error("declared length {len} exceeds limit {limit}")]
    LengthOverflow { len: usize, limit: usize },

    /// Writing a value failed (should not happen for in-memory buffers)
    #[error("failed to encode value: {detail}")]
    Encode { detail: String },
}
