//! The outbound pending-call table and the inbound in-flight-response set
//! (spec §4.8.1, §4.8.2, §4.8.3).

use std::collections::HashSet;
use std::time::Instant;

use indexmap::IndexMap;
use oneshot_fused_workaround as oneshot;
use serde_json::Value;

use ocpp_frame::{MessageId, RpcErrorCode};

/// Why a `call()` future failed, orthogonal to (but sometimes wrapping)
/// the wire error taxonomy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallFailure {
    /// No response within `callTimeoutMs` (spec §4.8.1).
    #[error("timed out waiting for a response")]
    Timeout,
    /// An abort signal fired before a response arrived.
    #[error("call was cancelled: {0}")]
    Cancelled(String),
    /// The connection closed before a response arrived.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    /// A `CALLERROR` came back.
    #[error("{code}: {message}")]
    Rpc {
        /// The classified error code (unknown wire codes degrade to
        /// `GenericError`; see [`ocpp_frame::RpcErrorCode::parse_lossy`]).
        code: RpcErrorCode,
        /// The original wire error code string, preserved verbatim
        /// (spec §4.2: "the original code text is preserved").
        raw_code: String,
        /// The error description from the wire.
        message: String,
        /// The error details object from the wire.
        details: Value,
    },
}

/// One outbound call awaiting its `CALLRESULT`/`CALLERROR`.
pub struct PendingCall {
    /// Resolves the `call()` future exactly once.
    pub resolver: oneshot::Sender<Result<Value, CallFailure>>,
    /// When this call times out.
    pub deadline: Instant,
    /// The method this call was issued for, needed to build the
    /// `incoming_result`/`incoming_error` middleware context once a
    /// reply arrives.
    pub method: String,
}

/// The table of outbound calls awaiting a reply, keyed by message id.
///
/// Backed by an [`IndexMap`] so that a full sweep (on close, or for
/// diagnostics) always visits entries in the order they were inserted —
/// the deterministic ordering spec §5 requires of a close-triggered sweep.
#[derive(Default)]
pub struct PendingCalls {
    entries: IndexMap<MessageId, PendingCall>,
}

impl PendingCalls {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new pending call. Message ids are caller-allocated to be
    /// collision-free, so this never overwrites an existing entry.
    pub fn insert(&mut self, id: MessageId, call: PendingCall) {
        self.entries.insert(id, call);
    }

    /// Remove and return the pending call for `id`, if any (used by both
    /// `_handleCallResult`/`_handleCallError` and timeout expiry — each
    /// path removes at most once, satisfying invariant #1 in spec §8).
    pub fn remove(&mut self, id: &MessageId) -> Option<PendingCall> {
        self.entries.shift_remove(id)
    }

    /// Whether a pending call exists for `id`.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    /// Remove and return every entry whose deadline has passed, in
    /// insertion order.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<(MessageId, PendingCall)> {
        let expired: Vec<MessageId> = self
            .entries
            .iter()
            .filter(|(_, call)| call.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.shift_remove(id.clone()).map(|c| (id, c)))
            .collect()
    }

    /// Drain every pending call, in insertion order — used when the
    /// connection closes (spec §5: "Server close cancels all pending
    /// calls... in a deterministic sweep").
    pub fn drain_all(&mut self) -> Vec<(MessageId, PendingCall)> {
        self.entries.drain(..).collect()
    }

    /// The earliest deadline among all pending calls, if any — used to
    /// size the next timeout-sweep sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|c| c.deadline).min()
    }

    /// How many calls are currently pending.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no calls are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The set of inbound message ids currently being handled, i.e. a
/// `CALL` was accepted and a handler future is in flight but no reply has
/// been sent yet (spec §4.8.2, §4.8.3: "at most one reply is ever
/// accepted").
#[derive(Default)]
pub struct PendingResponses {
    ids: HashSet<MessageId>,
}

impl PendingResponses {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `id` is now being handled. Returns `false` if it was
    /// already present (the duplicate-msgId case, spec §4.8.2 step 2,
    /// scenario 3 in §8).
    pub fn begin(&mut self, id: MessageId) -> bool {
        self.ids.insert(id)
    }

    /// Mark `id` as no longer awaiting a reply (either a reply was sent,
    /// or the handler returned `NOREPLY`).
    pub fn finish(&mut self, id: &MessageId) {
        self.ids.remove(id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn make_call() -> (PendingCall, oneshot::Receiver<Result<Value, CallFailure>>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingCall {
                resolver: tx,
                deadline: Instant::now() + Duration::from_secs(30),
                method: "Test".to_owned(),
            },
            rx,
        )
    }

    #[test]
    fn remove_is_idempotent_and_single_use() {
        let mut table = PendingCalls::new();
        let (call, _rx) = make_call();
        table.insert(MessageId::from("m1"), call);
        assert!(table.remove(&MessageId::from("m1")).is_some());
        assert!(table.remove(&MessageId::from("m1")).is_none());
    }

    #[test]
    fn sweep_expired_only_returns_past_deadlines() {
        let mut table = PendingCalls::new();
        let (mut early, _rx1) = make_call();
        early.deadline = Instant::now();
        let (late, _rx2) = make_call();
        table.insert(MessageId::from("early"), early);
        table.insert(MessageId::from("late"), late);

        std::thread::sleep(Duration::from_millis(5));
        let expired = table.sweep_expired(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, MessageId::from("early"));
        assert!(table.contains(&MessageId::from("late")));
    }

    #[test]
    fn drain_all_preserves_insertion_order() {
        let mut table = PendingCalls::new();
        for id in ["a", "b", "c"] {
            let (call, _rx) = make_call();
            table.insert(MessageId::from(id), call);
        }
        let drained = table.drain_all();
        let order: Vec<_> = drained.iter().map(|(id, _)| id.0.clone()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn pending_responses_detects_duplicates() {
        let mut set = PendingResponses::new();
        assert!(set.begin(MessageId::from("dup")));
        assert!(!set.begin(MessageId::from("dup")));
        set.finish(&MessageId::from("dup"));
        assert!(set.begin(MessageId::from("dup")));
    }
}
