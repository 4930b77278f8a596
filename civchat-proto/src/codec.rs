//! JSON text-frame codec for the push channel.
//!
//! One event per WebSocket text message. There is no framing beyond what the
//! WebSocket layer already provides.

use crate::event::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Frame exceeds [`MAX_FRAME_LEN`].
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },
}

/// Largest inbound frame the decoder will look at (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Encodes a client event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode(event: &ClientEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes a server event from a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::TooLarge`] for oversized frames and
/// [`CodecError::Serialization`] for malformed JSON or unknown events.
pub fn decode(frame: &str) -> Result<ServerEvent, CodecError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(CodecError::TooLarge {
            size: frame.len(),
            max: MAX_FRAME_LEN,
        });
    }
    Ok(serde_json::from_str(frame)?)
}

/// Encodes a server event. Used by in-process test servers.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes a client event. Used by in-process test servers.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] for malformed frames.
pub fn decode_client(frame: &str) -> Result<ClientEvent, CodecError> {
    Ok(serde_json::from_str(frame)?)
}
