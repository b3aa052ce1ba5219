//! The server-side acceptance pipeline (spec §4.11, §4.12, §6).
//!
//! This crate turns a raw HTTP upgrade request and an already-upgraded
//! transport into a running [`ocpp_peer::Peer`] — TLS/security-profile
//! enforcement, routing, rate limiting, and a bounded `authCallback`
//! all run here before a peer is ever spawned. It does not open
//! listening sockets or terminate TLS itself; that is left to the
//! caller, the same way `ocpp-peer::Connector`/`Transport` keep
//! `ocpp-peer` itself agnostic to the concrete socket type.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod auth;
mod config;
mod events;
mod handshake;
mod pipeline;
mod security;

pub use auth::{AcceptAll, AuthCallback, AuthDecision};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use events::ServerEvent;
pub use handshake::{Handshake, HandshakeError};
pub use pipeline::{accept_connection, AcceptError, ConnectionMiddleware, Listener};
pub use security::{SecurityProfile, TlsContext, TlsMaterial, TlsUpdate};
