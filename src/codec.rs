//! Raw envelope codec: one JSON object ↔ one typed [`Envelope`].
//!
//! Kind is discriminated purely by field presence (§4.2): the wire format
//! carries no explicit `kind` tag, so decoding always goes through a
//! generic `serde_json::Value` first.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::{
    Command, Envelope, Message, Notification, RequestCommand, ResponseCommand, SessionEnvelope,
};

/// Default per-peer byte-size cap on a single decoded envelope (§4.1, §6).
pub const MAX_ENVELOPE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    MalformedJson(String),
    #[error("envelope is not a JSON object")]
    NotAnObject,
    #[error("envelope does not match any known kind")]
    UnknownKind,
    #[error("missing required field `{0}` for this envelope kind")]
    MissingField(&'static str),
    #[error("unknown authentication scheme")]
    UnknownScheme,
    #[error("envelope exceeds the maximum size of {0} bytes")]
    TooLarge(usize),
    #[error("{0}")]
    Other(String),
}

/// Decodes one JSON object into its typed envelope, classifying by field
/// presence per §4.2.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    if bytes.len() > MAX_ENVELOPE_BYTES {
        return Err(CodecError::TooLarge(MAX_ENVELOPE_BYTES));
    }

    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::MalformedJson(e.to_string()))?;
    let obj = value.as_object().ok_or(CodecError::NotAnObject)?;

    if obj.contains_key("method") {
        let command: Command =
            serde_json::from_value(value).map_err(|e| CodecError::Other(e.to_string()))?;
        let request =
            RequestCommand::try_from(command).map_err(|e| CodecError::Other(e.to_string()))?;
        return Ok(Envelope::RequestCommand(request));
    }
    if obj.contains_key("status") {
        let command: Command =
            serde_json::from_value(value).map_err(|e| CodecError::Other(e.to_string()))?;
        let response =
            ResponseCommand::try_from(command).map_err(|e| CodecError::Other(e.to_string()))?;
        return Ok(Envelope::ResponseCommand(response));
    }
    if obj.contains_key("event") {
        let notification: Notification =
            serde_json::from_value(value).map_err(|e| CodecError::Other(e.to_string()))?;
        return Ok(Envelope::Notification(notification));
    }
    if obj.contains_key("state") {
        let session: SessionEnvelope =
            serde_json::from_value(value).map_err(|e| CodecError::Other(e.to_string()))?;
        return Ok(Envelope::Session(session));
    }
    if obj.contains_key("content") || obj.contains_key("type") {
        let message: Message =
            serde_json::from_value(value).map_err(|e| CodecError::Other(e.to_string()))?;
        return Ok(Envelope::Message(message));
    }

    Err(CodecError::UnknownKind)
}

/// Encodes an envelope as a single JSON object, one line, no trailing newline.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let value = match envelope {
        Envelope::Message(m) => serde_json::to_value(m),
        Envelope::Notification(n) => serde_json::to_value(n),
        Envelope::RequestCommand(c) => serde_json::to_value(c.clone().into_command()),
        Envelope::ResponseCommand(c) => serde_json::to_value(c.clone().into_command()),
        Envelope::Session(s) => serde_json::to_value(s),
    }
    .map_err(|e| CodecError::Other(e.to_string()))?;
    serde_json::to_vec(&value).map_err(|e| CodecError::Other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Event, Method, Status};

    #[test]
    fn classifies_request_command() {
        let json = br#"{"id":"1","method":"get","uri":"/ping"}"#;
        match decode(json).unwrap() {
            Envelope::RequestCommand(c) => {
                assert_eq!(c.method, Method::Get);
                assert_eq!(c.uri.as_deref(), Some("/ping"));
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn classifies_response_command() {
        let json = br#"{"id":"1","status":"success"}"#;
        match decode(json).unwrap() {
            Envelope::ResponseCommand(c) => assert_eq!(c.status, Status::Success),
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn classifies_notification() {
        let json = br#"{"event":"received"}"#;
        match decode(json).unwrap() {
            Envelope::Notification(n) => assert_eq!(n.event, Event::Received),
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn classifies_session() {
        let json = br#"{"state":"new"}"#;
        assert!(matches!(decode(json).unwrap(), Envelope::Session(_)));
    }

    #[test]
    fn classifies_message_by_content() {
        let json = br#"{"content":"hi","type":"text/plain"}"#;
        assert!(matches!(decode(json).unwrap(), Envelope::Message(_)));
    }

    #[test]
    fn unknown_kind_is_an_error_not_a_panic() {
        let json = br#"{"foo":"bar"}"#;
        assert!(matches!(decode(json), Err(CodecError::UnknownKind)));
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        let json = b"{not json";
        assert!(matches!(decode(json), Err(CodecError::MalformedJson(_))));
    }

    #[test]
    fn oversized_envelope_is_rejected() {
        let big = vec![b' '; MAX_ENVELOPE_BYTES + 1];
        assert!(matches!(decode(&big), Err(CodecError::TooLarge(_))));
    }

    #[test]
    fn encode_omits_absent_optional_fields() {
        let request = RequestCommand::new("1", Method::Get, "/ping");
        let bytes = encode(&Envelope::RequestCommand(request)).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("\"from\""));
        assert!(!text.contains("\"metadata\""));
    }

    #[test]
    fn decode_encode_round_trips_request_command() {
        let request = RequestCommand::new("abc", Method::Set, "/foo");
        let bytes = encode(&Envelope::RequestCommand(request.clone())).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, Envelope::RequestCommand(request));
    }
}
