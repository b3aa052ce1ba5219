//! An in-memory duplex transport for integration tests — the "in-memory
//! duplex for tests" `Transport` impl the workspace's own `transport.rs`
//! doc comment anticipates, so the scenario tests never need a real
//! socket.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::{Sink, Stream};
use tokio::sync::mpsc;

use ocpp_rpc::TransportError;

pub struct DuplexTransport {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

impl Stream for DuplexTransport {
    type Item = Result<String, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx).map(|item| item.map(Ok))
    }
}

impl Sink<String> for DuplexTransport {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        self.get_mut()
            .tx
            .send(item)
            .map_err(TransportError::from_display)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Build a connected pair: bytes sent into `.0` arrive on `.1`, and
/// vice versa.
pub fn duplex_pair() -> (DuplexTransport, DuplexTransport) {
    let (tx_a, rx_b) = mpsc::unbounded_channel();
    let (tx_b, rx_a) = mpsc::unbounded_channel();
    (
        DuplexTransport { rx: rx_a, tx: tx_a },
        DuplexTransport { rx: rx_b, tx: tx_b },
    )
}
