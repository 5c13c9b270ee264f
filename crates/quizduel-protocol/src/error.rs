//! Error types for the protocol layer.
//!
//! Each crate in QuizDuel defines its own error enum. A `ProtocolError`
//! always means the problem is in turning events into bytes (or back),
//! or in a value that failed boundary validation, never in networking or
//! game state.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning an event into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into an event).
    ///
    /// Common causes: malformed JSON, missing required fields, or an
    /// unknown `type` tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The event decoded fine but violates a protocol rule, e.g. an empty
    /// username or a handshake with the wrong version.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
