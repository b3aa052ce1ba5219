//! The server configuration surface (spec §6, "Server"): the
//! inheritance-bearing keys shared with [`ocpp_peer::PeerConfig`] plus
//! the server-only keys (`maxPayloadBytes`, `handshakeTimeoutMs`,
//! `connectionRateLimit`, `tls`, `securityProfile`).
//!
//! Built with `derive_builder`, matching `ocpp-peer::PeerConfig`'s own
//! choice of the same crate for the same reason (spec'd defaults,
//! `tor-config`-style option structs in the teacher).

use std::time::Duration;

use derive_builder::Builder;

use ocpp_peer::PeerConfig;
use ocpp_router::RouteConfig;
use ocpp_validate::StrictMode;

use crate::security::SecurityProfile;

/// Listener-wide configuration; individual routes may override the
/// inheritance-bearing fields via [`RouteConfig::merge_over`].
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ServerConfig {
    /// Subprotocols this listener offers, in preference order.
    #[builder(default = "vec![\"ocpp1.6\".to_owned()]")]
    pub protocols: Vec<String>,
    /// Default per-call timeout for accepted peers.
    #[builder(default = "Duration::from_millis(30_000)")]
    pub call_timeout: Duration,
    /// Default keep-alive ping interval; 0 disables pinging.
    #[builder(default = "Duration::from_millis(0)")]
    pub ping_interval: Duration,
    /// Postpone the next ping if inbound activity was seen recently.
    #[builder(default = "false")]
    pub defer_pings_on_activity: bool,
    /// Default strict-mode policy for accepted peers, overridable per
    /// route (spec §4.4, §4.6, §6).
    #[builder(default = "StrictMode::All")]
    pub strict_mode: StrictMode,
    /// Default maximum concurrent outbound calls per accepted peer.
    #[builder(default = "1")]
    pub call_concurrency: usize,
    /// Default bad-message tolerance before a 1002 close.
    #[builder(default = "10")]
    pub max_bad_messages: u32,
    /// Include name/message/stack/code detail in CALLERROR payloads.
    #[builder(default = "false")]
    pub respond_with_detailed_errors: bool,
    /// Maximum inbound frame size in bytes; larger frames trigger a 1009
    /// close (server-only; spec §6).
    #[builder(default = "65536")]
    pub max_payload_bytes: usize,
    /// How long `authCallback` may take before the upgrade is aborted
    /// (spec §4.11 step 8).
    #[builder(default = "Duration::from_millis(10_000)")]
    pub handshake_timeout: Duration,
    /// Per-remote-address connection attempts: `(limit, window_ms)`.
    /// `None` disables connection-attempt rate limiting.
    #[builder(default = "None")]
    pub connection_rate_limit: Option<(u32, u64)>,
    /// The security profile this listener enforces.
    #[builder(default = "SecurityProfile::None")]
    pub security_profile: SecurityProfile,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfigBuilder::default()
            .build()
            .expect("all fields have defaults")
    }
}

impl ServerConfig {
    /// Merge a matched route's overrides atop this listener's defaults
    /// and produce the [`PeerConfig`] the accepted peer will run with
    /// (spec §4.6, "Config inheritance"; spec §4.11 step 7).
    pub fn merged_peer_config(&self, route: &RouteConfig, identity: impl Into<String>) -> PeerConfig {
        let merged = route.merge_over(&RouteConfig {
            call_timeout_ms: Some(self.call_timeout.as_millis() as u64),
            ping_interval_ms: Some(self.ping_interval.as_millis() as u64),
            call_concurrency: Some(self.call_concurrency),
            strict_mode: Some(strict_mode_to_route(&self.strict_mode)),
            respond_with_detailed_errors: Some(self.respond_with_detailed_errors),
            max_bad_messages: Some(self.max_bad_messages),
        });

        let mut builder = ocpp_peer::PeerConfigBuilder::default();
        builder.identity(identity.into());
        builder.protocols(self.protocols.clone());
        builder.reconnect(false);
        if let Some(ms) = merged.call_timeout_ms {
            builder.call_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = merged.ping_interval_ms {
            builder.ping_interval(Duration::from_millis(ms));
        }
        builder.defer_pings_on_activity(self.defer_pings_on_activity);
        if let Some(concurrency) = merged.call_concurrency {
            builder.call_concurrency(concurrency);
        }
        if let Some(max_bad) = merged.max_bad_messages {
            builder.max_bad_messages(max_bad);
        }
        if let Some(detailed) = merged.respond_with_detailed_errors {
            builder.respond_with_detailed_errors(detailed);
        }
        builder.max_payload_bytes(self.max_payload_bytes);
        builder.handshake_timeout(self.handshake_timeout);
        if let Some(list) = merged.strict_mode {
            builder.strict_mode(strict_mode_from_route(list));
        }
        builder.build().expect("all fields have defaults")
    }
}

/// `RouteConfig::strict_mode` stores the policy as opaque protocol
/// strings so `ocpp-router` doesn't need an `ocpp-validate` dependency;
/// these convert to and from the typed policy at the server boundary.
fn strict_mode_to_route(mode: &StrictMode) -> Vec<String> {
    match mode {
        StrictMode::All => vec!["all".to_owned()],
        StrictMode::None => vec!["none".to_owned()],
        StrictMode::Protocols(list) => list.clone(),
    }
}

fn strict_mode_from_route(list: Vec<String>) -> StrictMode {
    match list.as_slice() {
        [one] if one.eq_ignore_ascii_case("all") => StrictMode::All,
        [one] if one.eq_ignore_ascii_case("none") => StrictMode::None,
        _ => StrictMode::Protocols(list),
    }
}
