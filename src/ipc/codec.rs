//! JSON text-frame codec for the live-chat WebSocket.
//!
//! Framing is provided by the WebSocket layer; this module only turns
//! text payloads into [`ClientMessage`] values and [`ServerMessage`]
//! values back into text.

use super::protocol::{ClientMessage, RawEnvelope, ServerMessage};

/// Result of attempting to decode an inbound text frame.
#[derive(Debug)]
pub enum DecodeResult {
    /// Successfully decoded a known message variant.
    Ok(ClientMessage),
    /// Valid JSON object, but its `type` is unknown or its fields do not
    /// fit the known variant. Carries the `type` tag if one was present.
    UnknownType(Option<String>),
    /// Not a JSON object at all.
    Malformed(serde_json::Error),
}

/// Attempt two-phase decode of a text payload.
///
/// 1. Try to deserialize as [`ClientMessage`] (known variant).
/// 2. On failure, try [`RawEnvelope`] to extract `type`.
/// 3. If both fail, return [`DecodeResult::Malformed`].
pub fn decode_frame(payload: &str) -> DecodeResult {
    match serde_json::from_str::<ClientMessage>(payload) {
        Ok(msg) => DecodeResult::Ok(msg),
        Err(_) => match serde_json::from_str::<RawEnvelope>(payload) {
            Ok(envelope) => DecodeResult::UnknownType(envelope.msg_type),
            Err(e) => DecodeResult::Malformed(e),
        },
    }
}

/// Encode an outbound message as a JSON text payload.
pub fn encode_message(msg: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}
