//! Error taxonomy for the link engine.
//!
//! Everything below the session boundary (framing, decode) is recovered
//! locally and never unwinds the read loop; these types exist for the
//! places where an error does cross a component boundary: command entry
//! points and the codec's per-frame results.
use thiserror::Error;

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Port open/read/write failure. Triggers reconnection internally
    /// unless the disconnect was user-initiated.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Corrupt frame header or payload length on the wire.
    #[error("invalid frame: {0}")]
    Frame(String),

    /// Well-framed but undecodable payload.
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    /// A command was issued in a state that cannot honor it. Surfaced
    /// synchronously to the caller; never retried.
    #[error("command rejected: {0}")]
    Command(String),

    /// The node-database sync did not complete in time.
    #[error("node database sync timed out")]
    SyncTimeout,
}

/// Per-frame decode/encode failures inside the protocol codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed protobuf: {0}")]
    Malformed(#[from] prost::DecodeError),

    /// The frame decoded but carried no payload variant this engine
    /// understands (typically a newer firmware feature). Dropped quietly.
    #[error("frame carried an unsupported payload variant")]
    UnsupportedVariant,

    /// A recognized portnum whose payload did not match its advertised
    /// shape (bad UTF-8, truncated sub-message, corrupt DEFLATE stream).
    #[error("bad payload for portnum {portnum}: {reason}")]
    BadPayload { portnum: i32, reason: String },

    /// An outbound payload would not fit in a frame.
    #[error("encoded payload of {0} bytes exceeds the frame limit")]
    Oversize(usize),
}
