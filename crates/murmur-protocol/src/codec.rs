//! Codec for encoding and decoding Murmur envelopes.
//!
//! Text frames carry JSON, binary frames carry MessagePack. Both decode
//! through the same envelope so unknown `type` values can be told apart
//! from known types with a broken payload.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::events::{InboundEvent, OutboundEvent};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum of 16 MiB")]
    FrameTooLarge(usize),

    /// JSON encoding or envelope decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A recognized event type whose payload has missing or mistyped fields.
    #[error("Malformed {kind} payload: {reason}")]
    Malformed { kind: String, reason: String },
}

/// Encoding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON in text frames.
    #[default]
    Json,
    /// MessagePack in binary frames.
    MessagePack,
}

/// An encoded outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    Text(String),
    Binary(Bytes),
}

impl Encoded {
    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(data) => data.len(),
        }
    }

    /// Whether the encoding is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Decode a JSON text frame.
///
/// Returns `Ok(None)` for a well-formed envelope with an unrecognized type.
///
/// # Errors
///
/// Returns an error if the frame is not an envelope or a recognized
/// type carries a malformed payload.
pub fn decode_text(text: &str) -> Result<Option<InboundEvent>, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let envelope: Envelope = serde_json::from_str(text)?;
    from_envelope(envelope)
}

/// Decode a MessagePack binary frame.
///
/// # Errors
///
/// Same conditions as [`decode_text`].
pub fn decode_binary(data: &[u8]) -> Result<Option<InboundEvent>, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let envelope: Envelope = rmp_serde::from_slice(data)?;
    from_envelope(envelope)
}

fn from_envelope(envelope: Envelope) -> Result<Option<InboundEvent>, ProtocolError> {
    let Envelope { kind, payload } = envelope;

    let event = match kind.as_str() {
        "authenticate" => InboundEvent::Authenticate(parse(&kind, payload)?),
        "message" => InboundEvent::Message(parse(&kind, payload)?),
        "typing" => InboundEvent::Typing(parse(&kind, payload)?),
        "stopTyping" => InboundEvent::StopTyping(parse(&kind, payload)?),
        "friendRequest" => InboundEvent::FriendRequest(parse(&kind, payload)?),
        "friendRequestResponse" => InboundEvent::FriendRequestResponse(parse(&kind, payload)?),
        "cancelFriendRequest" => InboundEvent::CancelFriendRequest(parse(&kind, payload)?),
        "messageRead" => InboundEvent::MessageRead(parse(&kind, payload)?),
        _ => return Ok(None),
    };

    Ok(Some(event))
}

fn parse<T: DeserializeOwned>(kind: &str, payload: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::Malformed {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Encode an event as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_text(event: &OutboundEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Encode an event as a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_binary(event: &OutboundEvent) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Encode an event in the given wire format.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode(event: &OutboundEvent, format: WireFormat) -> Result<Encoded, ProtocolError> {
    match format {
        WireFormat::Json => encode_text(event).map(Encoded::Text),
        WireFormat::MessagePack => encode_binary(event).map(Encoded::Binary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Decision, ErrorCode, FriendRequestResponse, InboundEvent};
    use serde_json::json;

    #[test]
    fn test_decode_known_events() {
        let event = decode_text(r#"{"type":"authenticate","payload":{"userId":1}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, InboundEvent::authenticate(1));

        let event = decode_text(r#"{"type":"message","payload":{"receiverId":2,"content":"hi"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, InboundEvent::message(2, "hi"));

        let event = decode_text(
            r#"{"type":"friendRequestResponse","payload":{"requestId":5,"status":"rejected"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::FriendRequestResponse(FriendRequestResponse {
                request_id: 5,
                status: Decision::Rejected,
            })
        );
    }

    #[test]
    fn test_decode_unknown_type_is_ignored() {
        let frame = r#"{"type":"updateStatus","payload":{"status":"away"}}"#;
        let decoded = decode_text(frame).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_decode_malformed_payload() {
        // Missing field
        match decode_text(r#"{"type":"message","payload":{"receiverId":2}}"#) {
            Err(ProtocolError::Malformed { kind, .. }) => assert_eq!(kind, "message"),
            other => panic!("Expected Malformed error, got {:?}", other),
        }

        // Wrong type
        assert!(matches!(
            decode_text(r#"{"type":"typing","payload":{"receiverId":"two"}}"#),
            Err(ProtocolError::Malformed { .. })
        ));

        // Pending is not a valid answer
        assert!(matches!(
            decode_text(
                r#"{"type":"friendRequestResponse","payload":{"requestId":1,"status":"pending"}}"#
            ),
            Err(ProtocolError::Malformed { .. })
        ));

        // Missing payload
        assert!(matches!(
            decode_text(r#"{"type":"authenticate"}"#),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_not_an_envelope() {
        assert!(matches!(decode_text("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            decode_text(r#"{"payload":{}}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_decode_messagepack() {
        let frame = json!({"type": "messageRead", "payload": {"messageId": 42}});
        let data = rmp_serde::to_vec_named(&frame).unwrap();

        let event = decode_binary(&data).unwrap().unwrap();
        assert_eq!(event.kind(), "messageRead");
    }

    #[test]
    fn test_encode_formats() {
        let event = OutboundEvent::error(ErrorCode::SelfRequest, "cannot befriend yourself");

        let text = match encode(&event, WireFormat::Json).unwrap() {
            Encoded::Text(text) => text,
            other => panic!("Expected text frame, got {:?}", other),
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], "selfRequest");

        let binary = encode(&event, WireFormat::MessagePack).unwrap();
        assert!(matches!(binary, Encoded::Binary(_)));
        assert!(!binary.is_empty());
    }
}
