//! The peer configuration surface (spec §6).
//!
//! Built with `derive_builder`, the same crate the teacher's config
//! layer (`tor-config`) encourages for option structs with defaults —
//! `tor-config` itself hand-rolls a similar builder pattern via its own
//! macros; `derive_builder` is the off-the-shelf equivalent pulled in
//! because this workspace doesn't carry `tor-config`'s macro machinery.

use std::time::Duration;

use derive_builder::Builder;
use ocpp_validate::StrictMode;

/// Per-peer configuration (spec §6, "Peer").
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct PeerConfig {
    /// This peer's identity (charge point id).
    #[builder(default = "String::new()")]
    pub identity: String,
    /// Subprotocols offered/accepted, in preference order.
    #[builder(default = "vec![\"ocpp1.6\".to_owned()]")]
    pub protocols: Vec<String>,
    /// Whether to automatically reconnect on unexpected close.
    #[builder(default = "true")]
    pub reconnect: bool,
    /// Maximum reconnect attempts before giving up.
    #[builder(default = "5")]
    pub max_reconnects: u32,
    /// Minimum backoff between reconnect attempts.
    #[builder(default = "Duration::from_millis(1000)")]
    pub backoff_min: Duration,
    /// Maximum backoff between reconnect attempts.
    #[builder(default = "Duration::from_millis(30_000)")]
    pub backoff_max: Duration,
    /// Per-call timeout. Default 30,000ms (spec §4.8.1).
    #[builder(default = "Duration::from_millis(30_000)")]
    pub call_timeout: Duration,
    /// Keep-alive ping interval; 0 disables pinging.
    #[builder(default = "Duration::from_millis(0)")]
    pub ping_interval: Duration,
    /// Postpone the next ping if inbound activity was seen recently.
    #[builder(default = "false")]
    pub defer_pings_on_activity: bool,
    /// Maximum concurrent outbound calls.
    #[builder(default = "1")]
    pub call_concurrency: usize,
    /// Bad messages tolerated before the peer force-closes with 1002.
    #[builder(default = "10")]
    pub max_bad_messages: u32,
    /// Include name/message/stack/code detail in CALLERROR payloads.
    #[builder(default = "false")]
    pub respond_with_detailed_errors: bool,
    /// Maximum inbound frame size in bytes; larger frames trigger a 1009
    /// close (spec §8, "Boundary behaviors").
    #[builder(default = "65536")]
    pub max_payload_bytes: usize,
    /// How long the auth/handshake step may take before aborting (server
    /// side only; unused on outbound peers but part of the shared
    /// inheritance-bearing config set, spec §6).
    #[builder(default = "Duration::from_millis(10_000)")]
    pub handshake_timeout: Duration,
    /// Whether schema validation is enforced, and for which subprotocols
    /// (spec §4.4, §6).
    #[builder(default = "StrictMode::All")]
    pub strict_mode: StrictMode,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfigBuilder::default()
            .build()
            .expect("all fields have defaults")
    }
}

/// Options for [`crate::Peer::close`] (spec §4.10, "Graceful close").
#[derive(Debug, Clone)]
pub struct CloseOptions {
    /// The WebSocket close code to send.
    pub code: u16,
    /// The close reason string.
    pub reason: String,
    /// Wait for pending calls to settle before closing the socket.
    pub await_pending: bool,
    /// Skip `await_pending` and close immediately, rejecting pending
    /// calls with a connection-closed error.
    pub force: bool,
}

impl Default for CloseOptions {
    fn default() -> Self {
        Self {
            code: 1000,
            reason: String::new(),
            await_pending: true,
            force: false,
        }
    }
}
