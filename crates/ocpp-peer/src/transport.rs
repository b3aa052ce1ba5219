//! The transport seam: a peer doesn't know or care whether frames travel
//! over a real WebSocket, an in-memory duplex, or anything else, as long
//! as it can be split into a [`Stream`] of inbound text frames and a
//! [`Sink`] of outbound ones.

use futures::{Sink, Stream};

/// A transport-level failure (socket error, TLS error, protocol-level
/// WebSocket error from the underlying library).
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    /// Wrap any displayable error as a [`TransportError`].
    pub fn from_display(e: impl std::fmt::Display) -> Self {
        Self(e.to_string())
    }
}

/// A duplex, message-framed transport: one `Stream` item is one inbound
/// text frame, one `Sink` item is one outbound text frame.
pub trait Transport:
    Stream<Item = Result<String, TransportError>> + Sink<String, Error = TransportError> + Unpin + Send
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<String, TransportError>> + Sink<String, Error = TransportError> + Unpin + Send
{
}
