//! The peer connection state machine (spec §4.10).

/// The lifecycle state of a peer's underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No transport yet, or the previous one closed and no reconnect is
    /// in progress.
    Closed,
    /// A transport (or reconnect) is being established.
    Connecting,
    /// The transport is live; calls may be dispatched.
    Open,
    /// A graceful close has been requested; waiting on pending calls
    /// and/or the socket close to complete.
    Closing,
}

impl PeerState {
    /// Whether a typed `call()` may be dispatched in this state
    /// (spec §4.8.1 step 1: "If peer state is not OPEN, fail").
    pub fn accepts_calls(self) -> bool {
        matches!(self, PeerState::Open)
    }

    /// Whether a raw send should be buffered rather than rejected
    /// (spec §4.10: "Outbound buffering").
    pub fn buffers_raw_sends(self) -> bool {
        matches!(self, PeerState::Connecting)
    }
}
