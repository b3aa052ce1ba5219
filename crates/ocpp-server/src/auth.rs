//! The authentication callback contract (spec §4.11 step 8).
//!
//! Mirrors `ocpp-middleware`'s `Terminal`/`Next` shape: a plain trait
//! with a late-bound-lifetime `BoxFuture` method, plus a blanket impl
//! for closures of the matching higher-ranked shape, so no
//! `async-trait` dependency is needed for a single-method trait.

use futures::future::BoxFuture;
use serde_json::Value;

use crate::handshake::Handshake;

/// What `authCallback` decided about one connecting client (spec §4.11
/// step 8, §6 "AuthDecision").
#[derive(Debug, Clone)]
pub enum AuthDecision {
    /// Accept the connection.
    Accept {
        /// Narrow the negotiated subprotocol to this one, if set;
        /// otherwise the pipeline's own intersection result stands.
        protocol: Option<String>,
        /// Opaque session data attached to the accepted peer's
        /// handshake record.
        session: Option<Value>,
    },
    /// Reject the connection with an HTTP status and message.
    Reject {
        /// The HTTP status code returned to the client.
        code: u16,
        /// A human-readable rejection message.
        message: String,
    },
}

/// Runs once per handshake, after routing and rate-limiting have
/// passed, to decide whether to accept the connecting peer.
pub trait AuthCallback: Send + Sync {
    /// Authenticate one handshake.
    fn authenticate<'a>(&'a self, handshake: &'a Handshake) -> BoxFuture<'a, AuthDecision>;
}

impl<F> AuthCallback for F
where
    F: for<'a> Fn(&'a Handshake) -> BoxFuture<'a, AuthDecision> + Send + Sync,
{
    fn authenticate<'a>(&'a self, handshake: &'a Handshake) -> BoxFuture<'a, AuthDecision> {
        self(handshake)
    }
}

/// The default callback for [`SecurityProfile::None`](crate::security::SecurityProfile::None):
/// accept everyone, changing nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl AuthCallback for AcceptAll {
    fn authenticate<'a>(&'a self, _handshake: &'a Handshake) -> BoxFuture<'a, AuthDecision> {
        Box::pin(async {
            AuthDecision::Accept {
                protocol: None,
                session: None,
            }
        })
    }
}
