//! The three OCPP RPC frame kinds (spec §3), and a message id type.
//!
//! Grounded on `arti-rpcserver::msgs`: that module represents request and
//! response as named Rust structs that `serde` maps onto (and off of) a
//! wire JSON shape that isn't itself struct-shaped (Arti's is a flattened
//! object; ours is a positional array). We keep the same split the teacher
//! uses between a "small id type with two representations" (their
//! `RequestId`, our [`MessageId`]) and a separate enum per logical
//! frame kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::taxonomy::RpcErrorCode;

/// The message-type discriminant occupying element 0 of every frame.
pub const CALL: u8 = 2;
/// The message-type discriminant occupying element 0 of every frame.
pub const CALLRESULT: u8 = 3;
/// The message-type discriminant occupying element 0 of every frame.
pub const CALLERROR: u8 = 4;

/// A message id: a string that correlates a `CALL` with its eventual
/// `CALLRESULT`/`CALLERROR`, unique within one peer's in-flight set
/// (spec §3, "Invariants").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Allocate a fresh, collision-resistant message id.
    ///
    /// Spec §4.8.1 step 1 permits either a CUID or a UUID; we use a UUIDv4,
    /// the simpler and more broadly supported of the two.
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A parsed `CALL` frame: `[2, messageId, action, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Correlates the eventual reply.
    pub message_id: MessageId,
    /// The method name being invoked.
    pub action: String,
    /// The request payload. Always a JSON object (spec §3 invariant).
    pub payload: Value,
}

/// A parsed `CALLRESULT` frame: `[3, messageId, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    /// Echoes the `CALL`'s message id.
    pub message_id: MessageId,
    /// The response payload. Always a JSON object.
    pub payload: Value,
}

/// A parsed `CALLERROR` frame: `[4, messageId, errorCode, errorDescription, errorDetails]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    /// Echoes the `CALL`'s message id.
    pub message_id: MessageId,
    /// The wire error code string (may not be one of our known variants;
    /// see [`CallError::code`]).
    pub error_code: String,
    /// A human-readable description of the error.
    pub error_description: String,
    /// Arbitrary additional detail. Always an object on the wire; defaults
    /// to `{}` if absent (spec §9, open-question resolution).
    pub error_details: Value,
}

impl CallError {
    /// Construct a `CALLERROR` from one of our own known error codes.
    pub fn from_code(
        message_id: MessageId,
        code: RpcErrorCode,
        details: Value,
    ) -> Self {
        Self {
            message_id,
            error_code: code.as_str().to_owned(),
            error_description: code.to_string(),
            error_details: details,
        }
    }

    /// Classify this error's wire code against our known taxonomy,
    /// degrading unrecognized codes to [`RpcErrorCode::GenericError`]
    /// while preserving the original string in [`CallError::error_code`].
    pub fn code(&self) -> RpcErrorCode {
        RpcErrorCode::parse_lossy(&self.error_code)
    }
}

/// Any one of the three RPC frame kinds, once parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A `CALL` frame.
    Call(Call),
    /// A `CALLRESULT` frame.
    CallResult(CallResult),
    /// A `CALLERROR` frame.
    CallError(CallError),
}

impl Frame {
    /// The message id carried by this frame, regardless of kind.
    pub fn message_id(&self) -> &MessageId {
        match self {
            Frame::Call(c) => &c.message_id,
            Frame::CallResult(c) => &c.message_id,
            Frame::CallError(c) => &c.message_id,
        }
    }
}
