//! The middleware stack (spec §4.5) applied uniformly to outgoing calls,
//! incoming calls, incoming results, and incoming errors.
//!
//! Rather than pull in `async-trait` here, the chain is built the way a
//! hand-rolled async middleware chain is usually built in Rust without a
//! framework: each step is a late-bound-lifetime trait method returning a
//! boxed future, the same shape `arti-rpcserver::connection` uses for its
//! per-request dispatch future (`run_method_and_deliver_response`), just
//! generalized into a chain instead of one fixed step.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use ocpp_frame::{CallError, MessageId, RpcErrorCode};

/// Which of the four contexts a middleware invocation is processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// A local `call()` about to be sent.
    OutgoingCall,
    /// An inbound `CALL` about to be dispatched to a handler.
    IncomingCall,
    /// An inbound `CALLRESULT` about to resolve a pending call.
    IncomingResult,
    /// An inbound `CALLERROR` about to reject a pending call.
    IncomingError,
}

/// The mutable body carried by a [`Context`], whose variant is determined
/// by [`ContextKind`] (spec §4.5: "params|payload|error").
#[derive(Debug, Clone)]
pub enum Body {
    /// `outgoing_call` / `incoming_call`: the CALL's parameters.
    Params(Value),
    /// `incoming_result`: the CALLRESULT's payload.
    Payload(Value),
    /// `incoming_error`: the CALLERROR, read-only.
    Error(CallError),
}

/// The context object threaded through one middleware invocation.
///
/// `id` and `kind` are read-only by convention: middleware is only ever
/// handed `&mut Context`, but [`Context::body_mut`] is the only supported
/// mutation point, matching spec §4.5 ("Middleware may mutate ctx fields
/// in place (params and payload only); id/type are read-only").
#[derive(Debug, Clone)]
pub struct Context {
    kind: ContextKind,
    /// The correlating message id.
    pub message_id: MessageId,
    /// The method/action name.
    pub method: String,
    /// The negotiated subprotocol.
    pub protocol: String,
    body: Body,
}

impl Context {
    /// Construct a new context.
    pub fn new(
        kind: ContextKind,
        message_id: MessageId,
        method: impl Into<String>,
        protocol: impl Into<String>,
        body: Body,
    ) -> Self {
        Self {
            kind,
            message_id,
            method: method.into(),
            protocol: protocol.into(),
            body,
        }
    }

    /// Which context this is.
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Read-only access to the body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Mutable access to the body. Replacing a [`Body::Error`] with
    /// anything else, or vice versa, is a logic error in caller code but
    /// not prevented here; callers are expected to only replace the
    /// `Value` inside `Params`/`Payload` via [`Context::set_value`].
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Replace the JSON value carried by a `Params` or `Payload` body.
    /// A no-op on `Error` bodies, which are read-only (spec §4.5).
    pub fn set_value(&mut self, value: Value) {
        match &mut self.body {
            Body::Params(p) => *p = value,
            Body::Payload(p) => *p = value,
            Body::Error(_) => {}
        }
    }

    /// The current JSON value, for `Params`/`Payload` bodies.
    pub fn value(&self) -> Option<&Value> {
        match &self.body {
            Body::Params(v) | Body::Payload(v) => Some(v),
            Body::Error(_) => None,
        }
    }
}

/// Failure modes for middleware execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MiddlewareError {
    /// A middleware (or the terminal) rejected the context.
    #[error("{code}: {message}")]
    Rejected {
        /// The RPC error code to surface.
        code: RpcErrorCode,
        /// A human-readable description.
        message: String,
    },
    /// A middleware called `next` more than once (spec §4.5).
    #[error("middleware called next() more than once")]
    NextCalledTwice,
}

impl MiddlewareError {
    /// Construct a [`MiddlewareError::Rejected`].
    pub fn rejected(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }
}

/// The terminal action at the end of a middleware chain: the actual
/// send (for outgoing contexts) or dispatch (for incoming contexts).
pub trait Terminal: Send + Sync {
    /// Run the terminal action against `ctx`.
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), MiddlewareError>>;
}

impl<F> Terminal for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), MiddlewareError>> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), MiddlewareError>> {
        self(ctx)
    }
}

/// One step in the middleware chain.
pub trait Middleware: Send + Sync {
    /// Process `ctx`, invoking `next` at most once to continue the chain.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), MiddlewareError>>;
}

/// A handle to the remainder of the middleware chain, passed to each
/// middleware's [`Middleware::handle`]. Calling it runs the next
/// middleware, or the terminal action if none remain.
///
/// Calling it a second time (even via a clone) returns
/// [`MiddlewareError::NextCalledTwice`] instead of re-running the chain —
/// the runtime analogue of the usage error spec §4.5 requires.
#[derive(Clone)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    index: usize,
    terminal: &'a dyn Terminal,
    used: Arc<AtomicBool>,
}

impl<'a> Next<'a> {
    /// Continue the chain: run the next middleware, or the terminal.
    ///
    /// Borrows `self` and `ctx` for a fresh, short-lived `'c` rather than
    /// the chain's own `'a`, so that a middleware which (incorrectly)
    /// calls `next.call(ctx)` twice in sequence can still reborrow `ctx`
    /// for the second call — the [`MiddlewareError::NextCalledTwice`]
    /// check, not the borrow checker, is what catches the misuse.
    pub fn call<'c>(&'c self, ctx: &'c mut Context) -> BoxFuture<'c, Result<(), MiddlewareError>>
    where
        'a: 'c,
    {
        if self.used.swap(true, Ordering::SeqCst) {
            return Box::pin(async { Err(MiddlewareError::NextCalledTwice) });
        }
        match self.middlewares.get(self.index) {
            Some(mw) => {
                let next: Next<'c> = Next {
                    middlewares: self.middlewares,
                    index: self.index + 1,
                    terminal: self.terminal,
                    used: Arc::new(AtomicBool::new(false)),
                };
                mw.handle(ctx, next)
            }
            None => self.terminal.call(ctx),
        }
    }
}

/// An ordered, immutable-once-built middleware stack.
#[derive(Clone, Default)]
pub struct Stack {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Stack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware to the end of the stack.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Build a stack by concatenating server-level and route-level
    /// middlewares, in that order (spec §4.6: "concatenated with any
    /// server-level middlewares").
    pub fn concat(server: &Stack, route: &Stack) -> Stack {
        let mut combined = server.middlewares.clone();
        combined.extend(route.middlewares.iter().cloned());
        Stack {
            middlewares: combined,
        }
    }

    /// Run the full chain against `ctx`, ending in `terminal`.
    pub fn execute<'a>(
        &'a self,
        ctx: &'a mut Context,
        terminal: &'a dyn Terminal,
    ) -> BoxFuture<'a, Result<(), MiddlewareError>> {
        let next = Next {
            middlewares: &self.middlewares,
            index: 0,
            terminal,
            used: Arc::new(AtomicBool::new(false)),
        };
        next.call(ctx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    struct Passthrough;
    impl Middleware for Passthrough {
        fn handle<'a>(
            &'a self,
            ctx: &'a mut Context,
            next: Next<'a>,
        ) -> BoxFuture<'a, Result<(), MiddlewareError>> {
            Box::pin(async move { next.call(ctx).await })
        }
    }

    struct SetFlag;
    impl Middleware for SetFlag {
        fn handle<'a>(
            &'a self,
            ctx: &'a mut Context,
            next: Next<'a>,
        ) -> BoxFuture<'a, Result<(), MiddlewareError>> {
            Box::pin(async move {
                ctx.set_value(json!({"seen": true}));
                next.call(ctx).await
            })
        }
    }

    struct CallsNextTwice;
    impl Middleware for CallsNextTwice {
        fn handle<'a>(
            &'a self,
            ctx: &'a mut Context,
            next: Next<'a>,
        ) -> BoxFuture<'a, Result<(), MiddlewareError>> {
            Box::pin(async move {
                next.call(ctx).await?;
                next.call(ctx).await
            })
        }
    }

    fn recording_terminal() -> (Arc<std::sync::Mutex<Option<Value>>>, impl Terminal) {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let terminal = move |ctx: &mut Context| -> BoxFuture<'_, Result<(), MiddlewareError>> {
            *seen2.lock().unwrap() = ctx.value().cloned();
            Box::pin(async { Ok(()) })
        };
        (seen, terminal)
    }

    #[tokio::test]
    async fn chain_runs_in_order_and_reaches_terminal() {
        let mut stack = Stack::new();
        stack.push(Arc::new(Passthrough));
        stack.push(Arc::new(SetFlag));

        let (seen, terminal) = recording_terminal();
        let mut ctx = Context::new(
            ContextKind::OutgoingCall,
            MessageId::from("m1"),
            "Heartbeat",
            "ocpp1.6",
            Body::Params(json!({})),
        );
        stack.execute(&mut ctx, &terminal).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(json!({"seen": true})));
    }

    #[tokio::test]
    async fn calling_next_twice_is_a_usage_error() {
        let mut stack = Stack::new();
        stack.push(Arc::new(CallsNextTwice));

        let (_, terminal) = recording_terminal();
        let mut ctx = Context::new(
            ContextKind::IncomingCall,
            MessageId::from("m1"),
            "Heartbeat",
            "ocpp1.6",
            Body::Params(json!({})),
        );
        let err = stack.execute(&mut ctx, &terminal).await.unwrap_err();
        assert!(matches!(err, MiddlewareError::NextCalledTwice));
    }

    #[tokio::test]
    async fn error_bodies_ignore_set_value() {
        let mut ctx = Context::new(
            ContextKind::IncomingError,
            MessageId::from("m1"),
            "Heartbeat",
            "ocpp1.6",
            Body::Error(CallError::from_code(
                MessageId::from("m1"),
                RpcErrorCode::NotImplemented,
                json!({}),
            )),
        );
        ctx.set_value(json!({"ignored": true}));
        assert!(ctx.value().is_none());
    }
}
