//! The server event contract (spec §6, "Events emitted" — server side).

pub use ocpp_peer::SecurityEvent;

/// One listener-level lifecycle or security event.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer was accepted and spawned (spec §4.11 step 9).
    Client {
        /// The accepted peer's identity.
        identity: String,
    },
    /// A non-fatal error worth surfacing to observers.
    Error {
        /// A human-readable description.
        message: String,
    },
    /// An upgrade request could not be parsed or matched.
    UpgradeError {
        /// A human-readable description.
        message: String,
    },
    /// A security-relevant event (auth failure, rate limit, timeout).
    Security(SecurityEvent),
}
