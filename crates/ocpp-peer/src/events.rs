//! The peer event contract (spec §6, "Events emitted").
//!
//! The teacher's own event surface (e.g. `arti-rpcserver`'s `BoxStream`
//! of `Update`s per request) is a typed channel rather than a
//! string-keyed emitter; we follow that, per spec §9's own redesign
//! note ("a typed event sum... preserves contracts without `any`-typed
//! payloads").

use serde_json::Value;

use ocpp_frame::MessageId;

/// One peer lifecycle or traffic event.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A connection attempt has begun.
    Connecting,
    /// The transport is open and ready for calls.
    Open {
        /// The negotiated subprotocol.
        protocol: String,
    },
    /// Any frame was sent or received, before more specific classification.
    Message {
        /// `true` if this peer sent the frame, `false` if received.
        outbound: bool,
        /// The raw wire text.
        raw: String,
    },
    /// An outbound `call()` was dispatched.
    Call {
        /// The correlating message id.
        message_id: MessageId,
        /// The method name.
        method: String,
    },
    /// A `CALLRESULT` was received and resolved a pending call.
    CallResult {
        /// The correlating message id.
        message_id: MessageId,
    },
    /// A `CALLERROR` was received and rejected a pending call.
    CallError {
        /// The correlating message id.
        message_id: MessageId,
        /// The wire error code.
        code: String,
    },
    /// An inbound frame failed to parse or shape-check.
    BadMessage {
        /// Running count of bad messages seen this connection.
        count: u32,
    },
    /// The socket closed unexpectedly.
    Disconnect,
    /// The peer reached the `CLOSED` state.
    Close {
        /// The close code.
        code: u16,
        /// The close reason.
        reason: String,
    },
    /// A non-fatal error worth surfacing to observers.
    Error {
        /// A human-readable description.
        message: String,
    },
    /// A reconnect attempt has been scheduled.
    Reconnect {
        /// The 1-based attempt number.
        attempt: u32,
        /// How long until the attempt fires.
        delay: std::time::Duration,
    },
    /// A WebSocket ping was sent.
    Ping,
    /// A WebSocket pong was received.
    Pong,
    /// Outbound or inbound strict-mode validation rejected a payload.
    StrictValidationFailure {
        /// The correlating message id.
        message_id: MessageId,
        /// A human-readable description of the violation.
        message: String,
    },
}

/// Security-relevant events surfaced by the server (spec §6).
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    /// Authentication was rejected.
    AuthFailed {
        /// ISO-8601 timestamp.
        timestamp: String,
        /// The identity that failed, if known.
        identity: Option<String>,
        /// Extra detail.
        details: Option<Value>,
    },
    /// A connection attempt was refused by the rate limiter.
    ConnectionRateLimit {
        /// ISO-8601 timestamp.
        timestamp: String,
        /// Extra detail.
        details: Option<Value>,
    },
    /// The handshake auth callback did not call `accept`/`reject` in time.
    UpgradeAborted {
        /// ISO-8601 timestamp.
        timestamp: String,
        /// Extra detail.
        details: Option<Value>,
    },
}
