//! Parsing and serialization of the three OCPP wire tuples (spec §4.1).
//!
//! Unlike `arti-rpcserver::codecs`, which frames a byte stream (one JSON
//! object per line, via `asynchronous_codec`), a WebSocket transport
//! already frames messages for us: one text frame is one RPC frame. So
//! this module reduces to a pair of free functions, `decode` and `encode`,
//! rather than a `Decoder`/`Encoder` pair bound to an `AsyncRead`/`AsyncWrite`.
//! The lenient-parsing approach — try the strict shape first, and on
//! failure recover what we can for diagnostics — is carried over from
//! `arti-rpcserver::msgs::invalid::InvalidRequest`.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::message::{Call, CallError, CallResult, Frame, MessageId, CALL, CALLERROR, CALLRESULT};

/// Why a raw string could not be decoded as a valid RPC frame.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The text wasn't even well-formed JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    /// It parsed as JSON, but the top level wasn't an array.
    #[error("payload is not a JSON array")]
    NotAnArray,
    /// The array was empty, or its first element wasn't a small integer.
    #[error("frame has no recognizable message-type discriminant")]
    BadDiscriminant,
    /// The discriminant was not 2, 3, or 4.
    #[error("unsupported message type {0}")]
    UnsupportedMessageType(i64),
    /// A `CALL` frame was shorter than 3 elements, or its action was empty/not a string.
    #[error("malformed CALL frame")]
    MalformedCall,
    /// A `CALLRESULT` frame was shorter than 2 elements.
    #[error("malformed CALLRESULT frame")]
    MalformedCallResult,
    /// A `CALLERROR` frame was shorter than 4 elements.
    #[error("malformed CALLERROR frame")]
    MalformedCallError,
}

impl DecodeError {
    /// True for errors that look like a truncated/malformed frame rather
    /// than a message-type we've simply never heard of.
    pub fn is_format_violation(&self) -> bool {
        !matches!(self, DecodeError::UnsupportedMessageType(_))
    }
}

/// The outcome of a failed [`decode`]: the error, plus a best-effort
/// extraction of the message id, if any, so the caller can still send a
/// correlated `CALLERROR` (spec §4.1, "Error recovery on parse failure").
#[derive(Debug, Clone)]
pub struct DecodeFailure {
    /// What went wrong.
    pub error: DecodeError,
    /// The message id extracted from the raw text, if the text looked
    /// like a truncated `CALL` frame.
    pub recovered_message_id: Option<MessageId>,
}

/// Regex used to recover a message id out of text that looks like the start
/// of a `CALL` frame but failed to parse as full JSON (e.g. truncated mid-payload).
fn truncated_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*\[\s*2\s*,\s*"([^"]+)""#).expect("valid regex"))
}

/// Attempt to recover a message id from raw text that failed to decode.
fn recover_message_id(raw: &str) -> Option<MessageId> {
    truncated_call_re()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| MessageId(m.as_str().to_owned()))
}

/// Decode one raw WebSocket text frame into an RPC [`Frame`].
pub fn decode(raw: &str) -> Result<Frame, DecodeFailure> {
    decode_inner(raw).map_err(|error| DecodeFailure {
        recovered_message_id: if error.is_format_violation() {
            recover_message_id(raw)
        } else {
            None
        },
        error,
    })
}

fn decode_inner(raw: &str) -> Result<Frame, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let arr = value.as_array().ok_or(DecodeError::NotAnArray)?;
    let discriminant = arr
        .first()
        .and_then(Value::as_i64)
        .ok_or(DecodeError::BadDiscriminant)?;

    match discriminant {
        x if x == CALL as i64 => decode_call(arr),
        x if x == CALLRESULT as i64 => decode_call_result(arr),
        x if x == CALLERROR as i64 => decode_call_error(arr),
        other => Err(DecodeError::UnsupportedMessageType(other)),
    }
}

fn decode_call(arr: &[Value]) -> Result<Frame, DecodeError> {
    if arr.len() < 3 {
        return Err(DecodeError::MalformedCall);
    }
    let message_id = arr[1].as_str().ok_or(DecodeError::MalformedCall)?;
    let action = arr
        .get(2)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::MalformedCall)?;
    let payload = arr.get(3).cloned().unwrap_or_else(empty_object);
    if !payload.is_object() {
        return Err(DecodeError::MalformedCall);
    }
    Ok(Frame::Call(Call {
        message_id: MessageId(message_id.to_owned()),
        action: action.to_owned(),
        payload,
    }))
}

fn decode_call_result(arr: &[Value]) -> Result<Frame, DecodeError> {
    if arr.len() < 2 {
        return Err(DecodeError::MalformedCallResult);
    }
    let message_id = arr[1].as_str().ok_or(DecodeError::MalformedCallResult)?;
    let payload = arr.get(2).cloned().unwrap_or_else(empty_object);
    if !payload.is_object() {
        return Err(DecodeError::MalformedCallResult);
    }
    Ok(Frame::CallResult(CallResult {
        message_id: MessageId(message_id.to_owned()),
        payload,
    }))
}

fn decode_call_error(arr: &[Value]) -> Result<Frame, DecodeError> {
    if arr.len() < 4 {
        return Err(DecodeError::MalformedCallError);
    }
    let message_id = arr[1].as_str().ok_or(DecodeError::MalformedCallError)?;
    let error_code = arr[2].as_str().ok_or(DecodeError::MalformedCallError)?;
    let error_description = arr[3].as_str().unwrap_or_default();
    let error_details = arr.get(4).cloned().unwrap_or_else(empty_object);
    if !error_details.is_object() {
        return Err(DecodeError::MalformedCallError);
    }
    Ok(Frame::CallError(CallError {
        message_id: MessageId(message_id.to_owned()),
        error_code: error_code.to_owned(),
        error_description: error_description.to_owned(),
        error_details,
    }))
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Serialize a [`Frame`] to its canonical wire form: a JSON array of exactly
/// the arity specified for its kind (spec §4.1, "Serialization").
pub fn encode(frame: &Frame) -> String {
    match frame {
        Frame::Call(c) => {
            serde_json::to_string(&(CALL, &c.message_id.0, &c.action, &c.payload))
        }
        Frame::CallResult(c) => {
            serde_json::to_string(&(CALLRESULT, &c.message_id.0, &c.payload))
        }
        Frame::CallError(c) => serde_json::to_string(&(
            CALLERROR,
            &c.message_id.0,
            &c.error_code,
            &c.error_description,
            &c.error_details,
        )),
    }
    .expect("frame contents are always representable as JSON")
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_call() {
        let raw = r#"[2,"m1","Heartbeat",{}]"#;
        let frame = decode(raw).unwrap();
        assert_eq!(
            frame,
            Frame::Call(Call {
                message_id: "m1".into(),
                action: "Heartbeat".into(),
                payload: json!({}),
            })
        );
        assert_eq!(encode(&frame), raw);
    }

    #[test]
    fn round_trips_call_result() {
        let raw = r#"[3,"m1",{"currentTime":"2024-01-01T00:00:00Z"}]"#;
        let frame = decode(raw).unwrap();
        assert_eq!(encode(&frame), raw);
    }

    #[test]
    fn round_trips_call_error() {
        let raw = r#"[4,"m1","NotImplemented","no such method",{}]"#;
        let frame = decode(raw).unwrap();
        assert_eq!(encode(&frame), raw);
    }

    #[test]
    fn call_defaults_missing_payload_to_empty_object() {
        let frame = decode(r#"[2,"m1","Heartbeat"]"#).unwrap();
        match frame {
            Frame::Call(c) => assert_eq!(c.payload, json!({})),
            _ => panic!("expected Call"),
        }
    }

    #[test]
    fn rejects_unknown_discriminant() {
        let err = decode(r#"[9,"m1"]"#).unwrap_err();
        assert!(matches!(err.error, DecodeError::UnsupportedMessageType(9)));
        assert!(err.recovered_message_id.is_none());
    }

    #[test]
    fn recovers_message_id_from_truncated_call() {
        let err = decode(r#"[2, "x1", "BootNotification", {]"#).unwrap_err();
        assert!(matches!(err.error, DecodeError::InvalidJson(_)));
        assert_eq!(err.recovered_message_id, Some(MessageId::from("x1")));
    }

    #[test]
    fn rejects_non_array_top_level() {
        let err = decode(r#"{"hello":"world"}"#).unwrap_err();
        assert!(matches!(err.error, DecodeError::NotAnArray));
    }

    #[test]
    fn rejects_empty_action() {
        let err = decode(r#"[2,"m1","",{}]"#).unwrap_err();
        assert!(matches!(err.error, DecodeError::MalformedCall));
    }
}
