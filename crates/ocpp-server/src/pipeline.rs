//! The nine-step acceptance pipeline (spec §4.11): turn a raw HTTP
//! upgrade request and an already-upgraded [`Transport`](ocpp_peer::Transport)
//! into a running [`Peer`](ocpp_peer::Peer).
//!
//! Grounded on `arti-rpcserver/src/listen.rs`'s `accept_connections`
//! (accept loop → per-session setup → `tokio::spawn` the session's own
//! run loop, logging failures rather than letting one bad connection
//! take the listener down) and `session.rs`'s session-construction
//! sequencing. This crate never terminates TLS or opens a listening
//! socket itself — the caller does that and hands in the raw bytes of
//! the upgrade request plus the already-split transport, the same way
//! `ocpp-peer::Connector`/`Transport` keep `ocpp-peer` agnostic to the
//! concrete socket type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use ocpp_middleware::Stack;
use ocpp_peer::{HandlerRegistry, Peer, PeerState, Transport};
use ocpp_ratelimit::RateLimiter;
use ocpp_router::{Router, RouteConfig};
use ocpp_validate::ValidatorRegistry;

use crate::auth::{AuthCallback, AuthDecision};
use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::handshake::{self, Handshake, HandshakeError};

/// A hook run after rate-limiting but before `authCallback` (spec §4.11
/// step 7, "connection middlewares"). Distinct from
/// [`ocpp_middleware::Middleware`], which wraps one RPC message — this
/// wraps the handshake itself, before any peer exists to send frames
/// on. Mirrors the same late-bound-lifetime-`BoxFuture` shape as
/// [`AuthCallback`] and `ocpp-middleware`'s `Terminal`.
pub trait ConnectionMiddleware: Send + Sync {
    /// Inspect or mutate the in-progress handshake; return `Err` to
    /// reject the connection outright.
    fn handle<'a>(
        &'a self,
        handshake: &'a mut Handshake,
    ) -> BoxFuture<'a, Result<(), AcceptError>>;
}

/// Everything one listener needs to run the acceptance pipeline: the
/// router, rate limiter, server defaults, auth callback, and the
/// handler/middleware/validator set every accepted peer is spawned
/// with (spec §5, "Shared resources" — "the server owns... the router,
/// and the rate limiter").
pub struct Listener {
    /// Route table (spec §4.6).
    pub router: Router,
    /// Per-`remoteAddress` connection-attempt limiter (spec §4.11 step
    /// 5). `None` disables the check.
    pub rate_limiter: Option<RateLimiter>,
    /// Listener-wide configuration and defaults.
    pub server_config: ServerConfig,
    /// Decides accept/reject for each handshake (spec §4.11 step 8).
    pub auth_callback: Arc<dyn AuthCallback>,
    /// Run in order before `authCallback` (spec §4.11 step 7).
    pub connection_middlewares: Vec<Arc<dyn ConnectionMiddleware>>,
    /// Server-level RPC middleware, concatenated with each route's own
    /// via [`Stack::concat`] before being handed to the spawned peer.
    pub middleware: Stack,
    /// Inbound-call handlers shared by every peer this listener spawns.
    pub handlers: HandlerRegistry,
    /// Shared JSON-schema validators, if strict mode is configured.
    pub validators: Option<Arc<ValidatorRegistry>>,
    /// Where listener-level events are published.
    pub events: Option<mpsc::UnboundedSender<ServerEvent>>,
    /// Peers currently spawned by this listener, keyed by identity (spec
    /// §3, "Server state: clients: set of peers currently OPEN"). A peer
    /// removes itself once it reaches `CLOSED` (spec §4.11 step 9, §9).
    pub clients: Arc<Mutex<HashMap<String, Peer>>>,
}

/// Why a connection attempt did not result in a spawned peer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AcceptError {
    /// No route matched and no legacy `/ocpp/<id>` fallback applied.
    #[error("no route matched the request path")]
    NotFound,
    /// The upgrade request itself was malformed.
    #[error("upgrade request error: {0}")]
    Malformed(#[from] HandshakeError),
    /// The connection attempt was refused by the rate limiter.
    #[error("connection rate limit exceeded")]
    RateLimited,
    /// The offered, route-allowed, and server protocol sets didn't
    /// intersect.
    #[error("no compatible subprotocol")]
    NoCompatibleProtocol,
    /// `authCallback` rejected the connection.
    #[error("auth rejected ({code}): {message}")]
    AuthRejected {
        /// The HTTP status the caller should return.
        code: u16,
        /// The rejection message.
        message: String,
    },
    /// `authCallback` neither accepted nor rejected within
    /// `handshakeTimeoutMs`.
    #[error("auth callback timed out")]
    UpgradeAborted,
}

/// Run the full nine-step acceptance pipeline for one incoming
/// connection and, on success, spawn and return the running [`Peer`].
///
/// `raw_request` is the raw HTTP/1.1 upgrade request bytes; `transport`
/// is the already-upgraded WebSocket transport the caller produced
/// after this function approves the handshake at the HTTP layer (in
/// practice the caller performs the 101 response itself once it knows
/// accept/reject, so `transport` here models "the socket exists and is
/// ready to frame OCPP once we say go").
pub async fn accept_connection(
    listener: &Listener,
    raw_request: &[u8],
    remote_address: String,
    client_certificate: Option<Vec<u8>>,
    transport: Box<dyn Transport>,
) -> Result<Peer, AcceptError> {
    let security_profile = listener.server_config.security_profile;

    // Step 1: security profile branch. TLS termination itself happens
    // below this abstraction; here we only enforce the artifacts the
    // profile requires.
    if security_profile.requires_client_cert() && client_certificate.is_none() {
        emit_security(
            listener,
            ocpp_peer::SecurityEvent::AuthFailed {
                timestamp: now_iso8601(),
                identity: None,
                details: None,
            },
        );
        return Err(AcceptError::AuthRejected {
            code: 401,
            message: "client certificate required".to_owned(),
        });
    }

    // Step 2: parse the upgrade request.
    let mut handshake = handshake::parse_upgrade_request(raw_request, remote_address, security_profile)?;
    handshake.client_certificate = client_certificate;

    // Step 3: router match, falling back to the legacy `/ocpp/<id>`
    // matcher, else 404.
    let matched = listener.router.matches(&handshake.pathname);
    let (route_middlewares, route_config, allowed_protocols) = match &matched {
        Some(m) => (m.route.middlewares.clone(), m.route.config.clone(), m.route.allowed_protocols.clone()),
        None => {
            if Router::legacy_identity(&handshake.pathname).is_none() {
                return Err(AcceptError::NotFound);
            }
            (Stack::default(), RouteConfig::default(), None)
        }
    };

    // Step 4: assemble the handshake with route-derived fields.
    if let Some(m) = &matched {
        handshake.params = m.params.clone();
        if let Some(identity) = m.params.get("identity") {
            handshake.identity = identity.clone();
        }
    } else if let Some(identity) = Router::legacy_identity(&handshake.pathname) {
        handshake.identity = identity.to_owned();
    }

    if security_profile.requires_basic_auth() {
        let username_matches = matches!(
            (&handshake.basic_auth_username, &handshake.password),
            (Some(username), Some(_)) if username == &handshake.identity
        );
        if !username_matches {
            emit_security(
                listener,
                ocpp_peer::SecurityEvent::AuthFailed {
                    timestamp: now_iso8601(),
                    identity: Some(handshake.identity.clone()),
                    details: None,
                },
            );
            return Err(AcceptError::AuthRejected {
                code: 401,
                message: "basic auth required or username does not match identity".to_owned(),
            });
        }
    }

    // Step 5: connection rate limiter.
    if let Some(limiter) = &listener.rate_limiter {
        if !limiter.check(&handshake.remote_address) {
            emit_security(
                listener,
                ocpp_peer::SecurityEvent::ConnectionRateLimit {
                    timestamp: now_iso8601(),
                    details: None,
                },
            );
            return Err(AcceptError::RateLimited);
        }
    }

    // Step 6: subprotocol intersection.
    let negotiated = intersect_protocols(
        &handshake.protocols,
        allowed_protocols.as_deref(),
        &listener.server_config.protocols,
    );
    if negotiated.is_empty() {
        return Err(AcceptError::NoCompatibleProtocol);
    }

    // Step 7: connection middlewares.
    for middleware in &listener.connection_middlewares {
        middleware.handle(&mut handshake).await?;
    }

    // Step 8: bounded authCallback.
    let decision = tokio::time::timeout(
        listener.server_config.handshake_timeout,
        listener.auth_callback.authenticate(&handshake),
    )
    .await
    .map_err(|_| {
        emit_security(
            listener,
            ocpp_peer::SecurityEvent::UpgradeAborted {
                timestamp: now_iso8601(),
                details: None,
            },
        );
        AcceptError::UpgradeAborted
    })?;

    let protocol = match decision {
        AuthDecision::Reject { code, message } => {
            emit_security(
                listener,
                ocpp_peer::SecurityEvent::AuthFailed {
                    timestamp: now_iso8601(),
                    identity: Some(handshake.identity.clone()),
                    details: None,
                },
            );
            return Err(AcceptError::AuthRejected { code, message });
        }
        AuthDecision::Accept { protocol: Some(choice), .. } if negotiated.contains(&choice) => choice,
        AuthDecision::Accept { .. } => negotiated[0].clone(),
    };

    // Step 9: merge config, spawn the peer, emit `client`.
    let peer_config = listener
        .server_config
        .merged_peer_config(&route_config, handshake.identity.clone());
    let peer_middleware = Stack::concat(&listener.middleware, &route_middlewares);

    let peer = Peer::from_accepted(
        transport,
        protocol,
        peer_config,
        listener.handlers.clone(),
        peer_middleware,
        listener.validators.clone(),
        None,
    );

    emit(
        listener,
        ServerEvent::Client {
            identity: handshake.identity.clone(),
        },
    );

    listener
        .clients
        .lock()
        .unwrap()
        .insert(handshake.identity.clone(), peer.clone());
    spawn_client_reaper(Arc::clone(&listener.clients), handshake.identity.clone(), peer.clone());

    Ok(peer)
}

/// Remove a peer from the listener's `clients` table once it closes
/// (spec §3, §9: the peer owns removing itself from this set).
fn spawn_client_reaper(clients: Arc<Mutex<HashMap<String, Peer>>>, identity: String, peer: Peer) {
    tokio::spawn(async move {
        while peer.state() != PeerState::Closed {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        clients.lock().unwrap().remove(&identity);
    });
}

fn intersect_protocols(offered: &[String], route_allowed: Option<&[String]>, server_protocols: &[String]) -> Vec<String> {
    offered
        .iter()
        .filter(|p| server_protocols.iter().any(|sp| sp == *p))
        .filter(|p| route_allowed.map_or(true, |allowed| allowed.iter().any(|a| a == *p)))
        .cloned()
        .collect()
}

fn emit(listener: &Listener, event: ServerEvent) {
    if let Some(tx) = &listener.events {
        let _ = tx.send(event);
    }
}

fn emit_security(listener: &Listener, event: ocpp_peer::SecurityEvent) {
    emit(listener, ServerEvent::Security(event));
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}
