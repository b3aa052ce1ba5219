//! The RPC engine and connection lifecycle manager (spec §4.8, §4.9,
//! §4.10) — a single type playing both roles, since on the wire they are
//! inseparable: every inbound/outbound frame passes through both the
//! correlation tables and the state machine.
//!
//! Grounded on `arti-rpcserver/src/connection.rs`'s `run_loop` (a
//! `futures::select!` over inbound frames, a command channel, and
//! in-flight-task completion) and `arti-rpcserver/src/cancel.rs`'s
//! cancellable-future wrapper, generalized from "one connection, no
//! reconnect" to the full state machine spec §4.10 requires.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use oneshot_fused_workaround as oneshot;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use ocpp_frame::{Call, CallError, CallResult, Frame, MessageId, RpcErrorCode};
use ocpp_middleware::{Body, Context, ContextKind, MiddlewareError, Stack, Terminal};
use ocpp_queue::BoundedQueue;
use ocpp_validate::{Facet, ValidatorRegistry};

use crate::backoff::{is_intolerable, reconnect_delay};
use crate::closecode;
use crate::config::{CloseOptions, PeerConfig};
use crate::connector::Connector;
use crate::events::PeerEvent;
use crate::handlers::{HandlerOutcome, HandlerRegistry};
use crate::pending::{CallFailure, PendingCall, PendingCalls, PendingResponses};
use crate::state::PeerState;
use crate::transport::Transport;

/// Options for one outbound [`Peer::call`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the configured `callTimeoutMs` for this call only.
    pub timeout: Option<Duration>,
    /// Lets the caller abort this call before it settles (spec §4.8.1,
    /// §5 "Cancellation").
    pub cancel: Option<CancelHandle>,
}

/// A handle to cancel an in-flight [`Peer::call`]. Cloning shares the
/// same underlying signal; cancelling an already-settled call is a
/// harmless no-op.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    notify: Arc<Notify>,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelHandle {
    /// A handle with no cancellation requested yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the associated call, rejecting it with `reason`.
    pub fn cancel(&self, reason: impl Into<String>) {
        *self.reason.lock().unwrap() = Some(reason.into());
        self.notify.notify_one();
    }

    async fn cancelled(&self) -> String {
        self.notify.notified().await;
        self.reason.lock().unwrap().clone().unwrap_or_else(|| "cancelled".to_owned())
    }
}

struct CloseRequest {
    code: u16,
    reason: String,
}

struct Inner {
    config: PeerConfig,
    connector: Option<Box<dyn Connector>>,
    handlers: HandlerRegistry,
    middleware: Stack,
    validators: Option<Arc<ValidatorRegistry>>,
    queue: BoundedQueue,
    events: Option<mpsc::UnboundedSender<PeerEvent>>,

    state: Mutex<PeerState>,
    protocol: Mutex<String>,
    reconnect_attempt: Mutex<u32>,
    bad_message_count: AtomicU32,
    last_activity: Mutex<Instant>,

    outbound_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    outbound_buffer: Mutex<VecDeque<String>>,

    pending_calls: Mutex<PendingCalls>,
    pending_responses: Mutex<PendingResponses>,
    pending_cleared: Notify,

    close_request: Mutex<Option<CloseRequest>>,
    close_requested: Notify,
}

/// A peer: one end of an OCPP RPC connection, handling both outbound
/// `call()`s and inbound dispatch over whatever [`Transport`] it is
/// given.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<Inner>,
}

impl Peer {
    fn new(
        config: PeerConfig,
        handlers: HandlerRegistry,
        middleware: Stack,
        validators: Option<Arc<ValidatorRegistry>>,
        connector: Option<Box<dyn Connector>>,
        events: Option<mpsc::UnboundedSender<PeerEvent>>,
        protocol: String,
    ) -> Arc<Inner> {
        let concurrency = config.call_concurrency.max(1);
        Arc::new(Inner {
            queue: BoundedQueue::new(concurrency),
            config,
            connector,
            handlers,
            middleware,
            validators,
            events,
            state: Mutex::new(PeerState::Closed),
            protocol: Mutex::new(protocol),
            reconnect_attempt: Mutex::new(0),
            bad_message_count: AtomicU32::new(0),
            last_activity: Mutex::new(Instant::now()),
            outbound_tx: Mutex::new(None),
            outbound_buffer: Mutex::new(VecDeque::new()),
            pending_calls: Mutex::new(PendingCalls::new()),
            pending_responses: Mutex::new(PendingResponses::new()),
            pending_cleared: Notify::new(),
            close_request: Mutex::new(None),
            close_requested: Notify::new(),
        })
    }

    /// Construct an outbound peer and start its connect/reconnect
    /// supervisor loop.
    pub fn connect(
        config: PeerConfig,
        handlers: HandlerRegistry,
        middleware: Stack,
        validators: Option<Arc<ValidatorRegistry>>,
        connector: Box<dyn Connector>,
        events: Option<mpsc::UnboundedSender<PeerEvent>>,
    ) -> Self {
        let protocol = config.protocols.first().cloned().unwrap_or_default();
        let inner = Self::new(
            config,
            handlers,
            middleware,
            validators,
            Some(connector),
            events,
            protocol,
        );
        *inner.state.lock().unwrap() = PeerState::Connecting;
        emit(&inner, PeerEvent::Connecting);
        tokio::spawn(supervisor_loop(Arc::clone(&inner)));
        Peer { inner }
    }

    /// Wrap an already-negotiated transport as an `OPEN` peer (the
    /// server acceptance pipeline uses this — server-side peers never
    /// reconnect, spec §4.11 step 9).
    pub fn from_accepted(
        transport: Box<dyn Transport>,
        protocol: String,
        config: PeerConfig,
        handlers: HandlerRegistry,
        middleware: Stack,
        validators: Option<Arc<ValidatorRegistry>>,
        events: Option<mpsc::UnboundedSender<PeerEvent>>,
    ) -> Self {
        let inner = Self::new(config, handlers, middleware, validators, None, events, protocol.clone());
        *inner.state.lock().unwrap() = PeerState::Open;
        tokio::spawn(run_accepted(Arc::clone(&inner), transport, protocol));
        Peer { inner }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> PeerState {
        *self.inner.state.lock().unwrap()
    }

    /// The negotiated subprotocol.
    pub fn protocol(&self) -> String {
        self.inner.protocol.lock().unwrap().clone()
    }

    /// How many inbound frames have failed parsing/shape validation this
    /// connection (spec §4.9).
    pub fn bad_message_count(&self) -> u32 {
        self.inner.bad_message_count.load(Ordering::SeqCst)
    }

    /// Issue an outbound call (spec §4.8.1).
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Value,
        options: CallOptions,
    ) -> Result<Value, CallFailure> {
        if !self.state().accepts_calls() {
            return Err(CallFailure::ConnectionClosed);
        }
        let method = method.into();
        let inner = Arc::clone(&self.inner);
        let timeout = options.timeout.unwrap_or(inner.config.call_timeout);
        let cancel = options.cancel;
        let call_inner = Arc::clone(&inner);

        inner
            .queue
            .push(move || dispatch_outbound_call(call_inner, method, params, timeout, cancel))
            .await
            .map_err(|_| CallFailure::ConnectionClosed)?
    }

    /// Send a raw pre-serialized frame, bypassing middleware/validation.
    /// Buffered while `CONNECTING` (spec §4.10, "Outbound buffering");
    /// fails synchronously otherwise unless `OPEN`.
    pub fn send_raw(&self, text: String) -> Result<(), CallFailure> {
        match self.state() {
            PeerState::Open => {
                send_text(&self.inner, text);
                Ok(())
            }
            PeerState::Connecting => {
                self.inner.outbound_buffer.lock().unwrap().push_back(text);
                Ok(())
            }
            PeerState::Closed | PeerState::Closing => Err(CallFailure::ConnectionClosed),
        }
    }

    /// Gracefully (or forcibly) close the peer (spec §4.10).
    ///
    /// Calling this twice is a no-op the second time: once the peer is
    /// `CLOSED`, later calls return immediately (spec §8, "Double-close").
    pub async fn close(&self, options: CloseOptions) {
        if self.state() == PeerState::Closed {
            return;
        }
        *self.inner.state.lock().unwrap() = PeerState::Closing;

        if options.force {
            reject_all_pending(&self.inner, CallFailure::ConnectionClosed);
        } else if options.await_pending {
            loop {
                if self.inner.pending_calls.lock().unwrap().is_empty() {
                    break;
                }
                self.inner.pending_cleared.notified().await;
            }
        }

        *self.inner.close_request.lock().unwrap() = Some(CloseRequest {
            code: closecode::normalize(options.code),
            reason: options.reason,
        });
        self.inner.close_requested.notify_one();

        while self.state() != PeerState::Closed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn emit(inner: &Arc<Inner>, event: PeerEvent) {
    if let Some(tx) = &inner.events {
        let _ = tx.send(event);
    }
}

fn send_text(inner: &Arc<Inner>, text: String) {
    emit(
        inner,
        PeerEvent::Message {
            outbound: true,
            raw: text.clone(),
        },
    );
    if let Some(tx) = inner.outbound_tx.lock().unwrap().as_ref() {
        let _ = tx.send(text);
    }
}

fn reject_all_pending(inner: &Arc<Inner>, failure: CallFailure) {
    let drained = inner.pending_calls.lock().unwrap().drain_all();
    for (_, call) in drained {
        let _ = call.resolver.send(Err(failure.clone()));
    }
    inner.pending_cleared.notify_waiters();
}

/// The outbound middleware terminal: allocate an id, validate, register
/// the pending call, serialize, send (spec §4.8.1 step 3).
async fn dispatch_outbound_call(
    inner: Arc<Inner>,
    method: String,
    params: Value,
    timeout: Duration,
    cancel: Option<CancelHandle>,
) -> Result<Value, CallFailure> {
    let protocol = inner.protocol.lock().unwrap().clone();
    let message_id = MessageId::new_random();

    let mut ctx = Context::new(
        ContextKind::OutgoingCall,
        message_id.clone(),
        method.clone(),
        protocol.clone(),
        Body::Params(params),
    );

    struct OutboundTerminal {
        inner: Arc<Inner>,
        rx: Mutex<Option<oneshot::Receiver<Result<Value, CallFailure>>>>,
    }

    let (settle_tx, settle_rx) = oneshot::channel();
    let terminal = OutboundTerminal {
        inner: Arc::clone(&inner),
        rx: Mutex::new(Some(settle_rx)),
    };

    impl Terminal for OutboundTerminal {
        fn call<'a>(
            &'a self,
            ctx: &'a mut Context,
        ) -> futures::future::BoxFuture<'a, Result<(), MiddlewareError>> {
            Box::pin(async move {
                let params = ctx.value().cloned().unwrap_or(Value::Null);

                if let Some(validators) = &self.inner.validators {
                    if strict_mode_applies(&self.inner.config, &ctx.protocol) {
                        if let Err(failure) =
                            validators.validate(&ctx.protocol, &ctx.method, Facet::Request, &params)
                        {
                            emit(
                                &self.inner,
                                PeerEvent::StrictValidationFailure {
                                    message_id: ctx.message_id.clone(),
                                    message: failure.message.clone(),
                                },
                            );
                            return Err(MiddlewareError::rejected(failure.code, failure.message));
                        }
                    }
                }

                Ok(())
            })
        }
    }

    let result = inner.middleware.execute(&mut ctx, &terminal).await;
    if let Err(err) = result {
        return Err(middleware_error_to_call_failure(err));
    }

    let final_params = ctx.value().cloned().unwrap_or(Value::Null);
    let deadline = Instant::now() + timeout;
    inner.pending_calls.lock().unwrap().insert(
        message_id.clone(),
        PendingCall {
            resolver: settle_tx,
            deadline,
            method: method.clone(),
        },
    );

    let frame = Frame::Call(Call {
        message_id: message_id.clone(),
        action: method.clone(),
        payload: final_params,
    });
    send_text(&inner, ocpp_frame::encode(&frame));
    emit(
        &inner,
        PeerEvent::Call {
            message_id: message_id.clone(),
            method,
        },
    );

    let rx = terminal.rx.lock().unwrap().take().expect("rx taken exactly once");
    let cancelled = async {
        match &cancel {
            Some(handle) => handle.cancelled().await,
            None => std::future::pending::<String>().await,
        }
    };

    tokio::select! {
        result = rx => match result {
            Ok(result) => result,
            Err(_) => Err(CallFailure::ConnectionClosed),
        },
        _ = tokio::time::sleep(timeout) => {
            inner.pending_calls.lock().unwrap().remove(&message_id);
            inner.pending_cleared.notify_waiters();
            Err(CallFailure::Timeout)
        }
        reason = cancelled => {
            inner.pending_calls.lock().unwrap().remove(&message_id);
            inner.pending_cleared.notify_waiters();
            Err(CallFailure::Cancelled(reason))
        }
    }
}

fn strict_mode_applies(config: &PeerConfig, protocol: &str) -> bool {
    config.strict_mode.applies_to(protocol)
}

/// Shared by the outgoing-call terminal and the incoming-result/-error
/// paths: turn a middleware rejection into the `CallFailure` a `call()`
/// future (or a settled pending call) resolves to.
fn middleware_error_to_call_failure(err: MiddlewareError) -> CallFailure {
    let (code, message) = match err {
        MiddlewareError::Rejected { code, message } => (code, message),
        MiddlewareError::NextCalledTwice => (RpcErrorCode::RpcFrameworkError, err.to_string()),
    };
    CallFailure::Rpc {
        code,
        raw_code: code.as_str().to_owned(),
        message,
        details: Value::Null,
    }
}

async fn supervisor_loop(inner: Arc<Inner>) {
    loop {
        let connector = inner.connector.as_ref().expect("outbound peer always has a connector");
        match connector.connect().await {
            Ok((transport, protocol)) => {
                *inner.reconnect_attempt.lock().unwrap() = 0;
                *inner.protocol.lock().unwrap() = protocol.clone();
                *inner.state.lock().unwrap() = PeerState::Open;
                flush_outbound_buffer(&inner);
                emit(&inner, PeerEvent::Open { protocol: protocol.clone() });

                run_connection(Arc::clone(&inner), transport, protocol).await;

                if let Some(req) = inner.close_request.lock().unwrap().take() {
                    *inner.state.lock().unwrap() = PeerState::Closed;
                    emit(
                        &inner,
                        PeerEvent::Close {
                            code: req.code,
                            reason: req.reason,
                        },
                    );
                    return;
                }

                emit(&inner, PeerEvent::Disconnect);
                reject_all_pending(&inner, CallFailure::ConnectionClosed);

                if !inner.config.reconnect {
                    *inner.state.lock().unwrap() = PeerState::Closed;
                    emit(
                        &inner,
                        PeerEvent::Close {
                            code: 1000,
                            reason: String::new(),
                        },
                    );
                    return;
                }
            }
            Err(failure) => {
                if is_intolerable(&failure.message) {
                    *inner.state.lock().unwrap() = PeerState::Closed;
                    emit(
                        &inner,
                        PeerEvent::Close {
                            code: 1001,
                            reason: "Max reconnection attempts exhausted".to_owned(),
                        },
                    );
                    return;
                }
            }
        }

        let mut attempt = inner.reconnect_attempt.lock().unwrap();
        *attempt += 1;
        if *attempt > inner.config.max_reconnects {
            *inner.state.lock().unwrap() = PeerState::Closed;
            emit(
                &inner,
                PeerEvent::Close {
                    code: 1001,
                    reason: "Max reconnection attempts exhausted".to_owned(),
                },
            );
            return;
        }
        let this_attempt = *attempt;
        drop(attempt);

        let jitter: f64 = rand::random();
        let delay = reconnect_delay(inner.config.backoff_min, inner.config.backoff_max, this_attempt, jitter);
        *inner.state.lock().unwrap() = PeerState::Connecting;
        emit(
            &inner,
            PeerEvent::Reconnect {
                attempt: this_attempt,
                delay,
            },
        );
        tokio::time::sleep(delay).await;
    }
}

/// Drive a server-accepted connection for its single generation — no
/// reconnect supervisor wraps it, so this closes out the lifecycle
/// itself once `run_connection` returns, mirroring `supervisor_loop`'s
/// non-reconnecting branch (spec §4.11 step 9: accepted peers never
/// reconnect).
async fn run_accepted(inner: Arc<Inner>, transport: Box<dyn Transport>, protocol: String) {
    run_connection(Arc::clone(&inner), transport, protocol).await;

    if let Some(req) = inner.close_request.lock().unwrap().take() {
        *inner.state.lock().unwrap() = PeerState::Closed;
        emit(
            &inner,
            PeerEvent::Close {
                code: req.code,
                reason: req.reason,
            },
        );
        return;
    }

    emit(&inner, PeerEvent::Disconnect);
    reject_all_pending(&inner, CallFailure::ConnectionClosed);
    *inner.state.lock().unwrap() = PeerState::Closed;
    emit(
        &inner,
        PeerEvent::Close {
            code: 1000,
            reason: String::new(),
        },
    );
}

fn flush_outbound_buffer(inner: &Arc<Inner>) {
    let mut buffer = inner.outbound_buffer.lock().unwrap();
    while let Some(text) = buffer.pop_front() {
        drop(buffer);
        send_text(inner, text);
        buffer = inner.outbound_buffer.lock().unwrap();
    }
}

/// Drive one connection generation: spawn the reader/writer/ping/timeout
/// tasks and wait for any of them to signal the connection is over, or
/// for an explicit close request.
async fn run_connection(inner: Arc<Inner>, transport: Box<dyn Transport>, protocol: String) {
    let (sink, mut stream) = transport.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *inner.outbound_tx.lock().unwrap() = Some(tx.clone());

    let mut sink = sink;
    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(text).await.is_err() {
                break;
            }
        }
    });

    let reader_inner = Arc::clone(&inner);
    let mut reader = tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(text) => handle_inbound_text(&reader_inner, text),
                Err(_) => break,
            }
        }
    });

    // The keep-alive ping is a WebSocket control frame, not an RPC frame,
    // so it travels below the `Transport` text-frame abstraction — the
    // connector's concrete transport is expected to send it. This task
    // only tracks the interval and surfaces it as an event.
    let ping_task = if !inner.config.ping_interval.is_zero() {
        let ping_inner = Arc::clone(&inner);
        let interval = inner.config.ping_interval;
        let defer = inner.config.defer_pings_on_activity;
        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if defer {
                    loop {
                        let elapsed = ping_inner.last_activity.lock().unwrap().elapsed();
                        if elapsed >= interval {
                            break;
                        }
                        tokio::time::sleep(interval - elapsed).await;
                    }
                }
                emit(&ping_inner, PeerEvent::Ping);
            }
        }))
    } else {
        None
    };

    let sweep_inner = Arc::clone(&inner);
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        loop {
            ticker.tick().await;
            let expired = sweep_inner.pending_calls.lock().unwrap().sweep_expired(Instant::now());
            if expired.is_empty() {
                continue;
            }
            for (_, call) in expired {
                let _ = call.resolver.send(Err(CallFailure::Timeout));
            }
            sweep_inner.pending_cleared.notify_waiters();
        }
    });

    let _ = protocol;
    tokio::select! {
        _ = &mut reader => {}
        _ = &mut writer => {}
        _ = inner.close_requested.notified() => {}
    }
    reader.abort();
    writer.abort();
    if let Some(h) = &ping_task {
        h.abort();
    }
    sweeper.abort();
    *inner.outbound_tx.lock().unwrap() = None;
}

fn handle_inbound_text(inner: &Arc<Inner>, text: String) {
    *inner.last_activity.lock().unwrap() = Instant::now();
    emit(
        inner,
        PeerEvent::Message {
            outbound: false,
            raw: text.clone(),
        },
    );

    if text.len() > inner.config.max_payload_bytes {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            *inner.close_request.lock().unwrap() = Some(CloseRequest {
                code: 1009,
                reason: "payload too large".to_owned(),
            });
            inner.close_requested.notify_one();
        });
        return;
    }

    match ocpp_frame::decode(&text) {
        Ok(Frame::Call(call)) => {
            let inner = Arc::clone(inner);
            tokio::spawn(async move { handle_inbound_call(inner, call).await });
        }
        Ok(Frame::CallResult(result)) => {
            let inner = Arc::clone(inner);
            tokio::spawn(async move { handle_call_result(inner, result).await });
        }
        Ok(Frame::CallError(error)) => {
            let inner = Arc::clone(inner);
            tokio::spawn(async move { handle_call_error(inner, error).await });
        }
        Err(failure) => handle_bad_message(inner, failure),
    }
}

/// A middleware terminal that does nothing: for `incoming_result` and
/// `incoming_error`, the actual "terminal action" (resolving or rejecting
/// the pending call) happens after the chain runs, using the body the
/// chain leaves behind — there is nothing left to do inside the chain
/// itself.
struct NoopTerminal;

impl Terminal for NoopTerminal {
    fn call<'a>(&'a self, _ctx: &'a mut Context) -> futures::future::BoxFuture<'a, Result<(), MiddlewareError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Resolve a pending call's `CALLRESULT` through the middleware chain
/// (spec §4.5 "incoming_result") before settling the `call()` future. A
/// middleware's replacement of the payload is what the future resolves
/// to (spec §9 open question #2).
async fn handle_call_result(inner: Arc<Inner>, result: CallResult) {
    let Some(call) = inner.pending_calls.lock().unwrap().remove(&result.message_id) else {
        tracing::warn!(message_id = %result.message_id, "CALLRESULT for unknown or already-settled message id");
        return;
    };

    let protocol = inner.protocol.lock().unwrap().clone();
    let mut ctx = Context::new(
        ContextKind::IncomingResult,
        result.message_id.clone(),
        call.method.clone(),
        protocol,
        Body::Payload(result.payload),
    );
    let outcome = inner.middleware.execute(&mut ctx, &NoopTerminal).await;

    emit(
        &inner,
        PeerEvent::CallResult {
            message_id: result.message_id.clone(),
        },
    );

    let settled = match outcome {
        Ok(()) => Ok(ctx.value().cloned().unwrap_or(Value::Null)),
        Err(err) => Err(middleware_error_to_call_failure(err)),
    };
    let _ = call.resolver.send(settled);
    inner.pending_cleared.notify_waiters();
}

/// Run a pending call's `CALLERROR` through the middleware chain (spec
/// §4.5 "incoming_error") before rejecting the `call()` future. The error
/// body is read-only (`Context::set_value` is a no-op on `Body::Error`);
/// a middleware may still reject outright, which takes precedence over
/// the original wire error.
async fn handle_call_error(inner: Arc<Inner>, error: CallError) {
    let Some(call) = inner.pending_calls.lock().unwrap().remove(&error.message_id) else {
        tracing::warn!(message_id = %error.message_id, "CALLERROR for unknown or already-settled message id; dropped");
        return;
    };

    let original = CallFailure::Rpc {
        code: error.code(),
        raw_code: error.error_code.clone(),
        message: error.error_description.clone(),
        details: error.error_details.clone(),
    };

    let protocol = inner.protocol.lock().unwrap().clone();
    let mut ctx = Context::new(
        ContextKind::IncomingError,
        error.message_id.clone(),
        call.method.clone(),
        protocol,
        Body::Error(error.clone()),
    );
    let outcome = inner.middleware.execute(&mut ctx, &NoopTerminal).await;

    emit(
        &inner,
        PeerEvent::CallError {
            message_id: error.message_id.clone(),
            code: error.error_code.clone(),
        },
    );

    let settled = match outcome {
        Ok(()) => Err(original),
        Err(err) => Err(middleware_error_to_call_failure(err)),
    };
    let _ = call.resolver.send(settled);
    inner.pending_cleared.notify_waiters();
}

fn handle_bad_message(inner: &Arc<Inner>, failure: ocpp_frame::DecodeFailure) {
    let count = inner.bad_message_count.fetch_add(1, Ordering::SeqCst) + 1;
    emit(inner, PeerEvent::BadMessage { count });

    if let Some(message_id) = failure.recovered_message_id {
        let frame = Frame::CallError(CallError::from_code(
            message_id,
            RpcErrorCode::FormatViolation,
            Value::Object(serde_json::Map::new()),
        ));
        send_text(inner, ocpp_frame::encode(&frame));
    }

    if count >= inner.config.max_bad_messages {
        *inner.close_request.lock().unwrap() = Some(CloseRequest {
            code: 1002,
            reason: "protocol error".to_owned(),
        });
        inner.close_requested.notify_one();
    }
}

async fn handle_inbound_call(inner: Arc<Inner>, call: Call) {
    let protocol = inner.protocol.lock().unwrap().clone();
    let mut ctx = Context::new(
        ContextKind::IncomingCall,
        call.message_id.clone(),
        call.action.clone(),
        protocol.clone(),
        Body::Params(call.payload),
    );

    struct InboundTerminal {
        inner: Arc<Inner>,
    }

    impl Terminal for InboundTerminal {
        fn call<'a>(
            &'a self,
            ctx: &'a mut Context,
        ) -> futures::future::BoxFuture<'a, Result<(), MiddlewareError>> {
            Box::pin(async move { run_handler(&self.inner, ctx).await })
        }
    }

    let terminal = InboundTerminal {
        inner: Arc::clone(&inner),
    };
    if let Err(err) = inner.middleware.execute(&mut ctx, &terminal).await {
        tracing::warn!(error = %err, "middleware rejected incoming call outside the handler path");
    }
}

async fn run_handler(inner: &Arc<Inner>, ctx: &mut Context) -> Result<(), MiddlewareError> {
    let message_id = ctx.message_id.clone();
    let method = ctx.method.clone();
    let protocol = ctx.protocol.clone();
    let params = ctx.value().cloned().unwrap_or(Value::Null);

    if !inner.pending_responses.lock().unwrap().begin(message_id.clone()) {
        let frame = Frame::CallError(CallError::from_code(
            message_id,
            RpcErrorCode::RpcFrameworkError,
            Value::Object(serde_json::Map::new()),
        ));
        send_text(inner, ocpp_frame::encode(&frame));
        return Ok(());
    }

    if let Some(validators) = &inner.validators {
        if strict_mode_applies(&inner.config, &protocol) {
            if let Err(failure) = validators.validate(&protocol, &method, Facet::Request, &params) {
                inner.pending_responses.lock().unwrap().finish(&message_id);
                reply_error(inner, &message_id, failure.code, &failure.message, Value::Null);
                return Ok(());
            }
        }
    }

    let handler = inner.handlers.resolve(&protocol, &method);
    let outcome = match handler {
        None => Err(crate::handlers::HandlerError::with_code(
            RpcErrorCode::NotImplemented,
            RpcErrorCode::NotImplemented.to_string(),
        )),
        Some(handler) => handler.call(params).await,
    };

    inner.pending_responses.lock().unwrap().finish(&message_id);

    match outcome {
        Ok(HandlerOutcome::NoReply) => {}
        Ok(HandlerOutcome::Reply(payload)) => {
            if let Some(validators) = &inner.validators {
                if strict_mode_applies(&inner.config, &protocol) {
                    if let Err(failure) = validators.validate(&protocol, &method, Facet::Response, &payload) {
                        reply_error(inner, &message_id, failure.code, &failure.message, Value::Null);
                        return Ok(());
                    }
                }
            }
            ctx.set_value(payload);
            let frame = Frame::CallResult(CallResult {
                message_id: message_id.clone(),
                payload: ctx.value().cloned().unwrap_or(Value::Null),
            });
            send_text(inner, ocpp_frame::encode(&frame));
        }
        Err(handler_err) => {
            let details = if inner.config.respond_with_detailed_errors {
                serde_json::json!({ "message": handler_err.message, "code": handler_err.code.map(|c| c.as_str()) })
            } else {
                Value::Object(serde_json::Map::new())
            };
            reply_error(inner, &message_id, handler_err.rpc_error_code(), &handler_err.message, details);
        }
    }
    Ok(())
}

fn reply_error(inner: &Arc<Inner>, message_id: &MessageId, code: RpcErrorCode, _message: &str, details: Value) {
    let details = if details.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        details
    };
    let frame = Frame::CallError(CallError::from_code(message_id.clone(), code, details));
    send_text(inner, ocpp_frame::encode(&frame));
}
