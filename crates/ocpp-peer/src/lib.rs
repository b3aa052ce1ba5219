//! The RPC engine and connection lifecycle manager (spec §2: "RPC Engine"
//! and "Connection Lifecycle Manager").
//!
//! Everything needed to drive one peer — outbound `call()`s, inbound
//! dispatch, reconnection, keep-alive, and graceful close — lives here.
//! The server acceptance pipeline (`ocpp-server`) and the facade
//! (`ocpp-rpc`) build peers with [`Peer::connect`]/[`Peer::from_accepted`]
//! rather than touching the state machine directly.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backoff;
mod closecode;
mod config;
mod connector;
mod events;
mod handlers;
mod peer;
mod pending;
mod state;
mod transport;

pub use config::{CloseOptions, PeerConfig, PeerConfigBuilder};
pub use connector::{ConnectFailure, Connector};
pub use events::{PeerEvent, SecurityEvent};
pub use handlers::{Handler, HandlerError, HandlerOutcome, HandlerRegistry, RegisterError};
pub use peer::{CallOptions, CancelHandle, Peer};
pub use pending::CallFailure;
pub use state::PeerState;
pub use transport::{Transport, TransportError};
