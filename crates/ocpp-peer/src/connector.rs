//! How a peer (re)establishes its transport (spec §4.10, "Reconnection").
//!
//! A server-accepted peer never reconnects — it is constructed already
//! `OPEN` around a live transport via [`crate::Peer::from_accepted`] and
//! carries no [`Connector`]. An outbound peer is given one so the
//! supervisor loop in [`crate::Peer::connect`] can retry.

use futures::future::BoxFuture;

use crate::transport::Transport;

/// Why a connection attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ConnectFailure {
    /// A human-readable description. Checked against
    /// [`crate::backoff::is_intolerable`] to decide whether to keep
    /// retrying.
    pub message: String,
}

impl ConnectFailure {
    /// Construct a new failure from any displayable error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Establishes a fresh transport on demand.
pub trait Connector: Send + Sync {
    /// Attempt one connection, returning the transport plus the
    /// negotiated subprotocol string.
    fn connect(&self) -> BoxFuture<'_, Result<(Box<dyn Transport>, String), ConnectFailure>>;
}
