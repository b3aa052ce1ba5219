//! The inbound-call handler registry (spec §4.8.2, §4.8.4).

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use ocpp_frame::RpcErrorCode;

/// What a handler produced.
pub enum HandlerOutcome {
    /// Send this value back as the `CALLRESULT` payload.
    Reply(Value),
    /// Send nothing; the reserved `NOREPLY` sentinel was returned
    /// (spec §4.8.2 step 2).
    NoReply,
}

/// A handler failure, optionally carrying a known RPC error code. If none
/// is given, the dispatcher wraps it as `InternalError` (spec §4.8.2
/// step 3).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    /// The RPC error code to report, if the handler knows one.
    pub code: Option<RpcErrorCode>,
    /// A human-readable message.
    pub message: String,
    /// Extra detail to project into the CALLERROR's `errorDetails` when
    /// `respondWithDetailedErrors` is set.
    pub details: Value,
}

impl HandlerError {
    /// A handler error carrying a specific known RPC error code.
    pub fn with_code(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            details: Value::Null,
        }
    }

    /// A handler error with no known code; the dispatcher treats this as
    /// `InternalError`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: Value::Null,
        }
    }

    /// The RPC error code this should surface as, defaulting to
    /// `InternalError` (spec §4.8.2 step 3, §7 "Application" errors).
    pub fn rpc_error_code(&self) -> RpcErrorCode {
        self.code.unwrap_or(RpcErrorCode::InternalError)
    }
}

/// One inbound-call handler.
pub trait Handler: Send + Sync {
    /// Run the handler against `params`.
    fn call<'a>(&'a self, params: Value) -> BoxFuture<'a, Result<HandlerOutcome, HandlerError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<HandlerOutcome, HandlerError>> + Send + 'static,
{
    fn call<'a>(&'a self, params: Value) -> BoxFuture<'a, Result<HandlerOutcome, HandlerError>> {
        Box::pin(self(params))
    }
}

/// Error raised when registering a handler that conflicts with one
/// already registered (spec §4.8.4).
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum RegisterError {
    /// A handler for this exact method (protocol-agnostic) already exists.
    #[error("handler for method {0:?} already registered")]
    DuplicateMethod(String),
    /// A handler for this exact protocol:method pair already exists.
    #[error("handler for {0:?}:{1:?} already registered")]
    DuplicateProtocolMethod(String, String),
    /// A wildcard handler is already registered.
    #[error("a wildcard handler is already registered")]
    DuplicateWildcard,
}

/// The handler lookup table: per-protocol handlers, protocol-agnostic
/// handlers, and at most one wildcard, consulted in that priority order
/// (spec §4.8.2 step 2, §4.8.4).
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    by_protocol_method: HashMap<(String, String), Arc<dyn Handler>>,
    by_method: HashMap<String, Arc<dyn Handler>>,
    wildcard: Option<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protocol-agnostic handler for `method`.
    pub fn register(
        &mut self,
        method: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<(), RegisterError> {
        let method = method.into();
        if self.by_method.contains_key(&method) {
            return Err(RegisterError::DuplicateMethod(method));
        }
        self.by_method.insert(method, Arc::new(handler));
        Ok(())
    }

    /// Register a handler scoped to one subprotocol.
    pub fn register_for_protocol(
        &mut self,
        protocol: impl Into<String>,
        method: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<(), RegisterError> {
        let key = (protocol.into(), method.into());
        if self.by_protocol_method.contains_key(&key) {
            return Err(RegisterError::DuplicateProtocolMethod(key.0, key.1));
        }
        self.by_protocol_method.insert(key, Arc::new(handler));
        Ok(())
    }

    /// Register the (sole) wildcard handler, invoked when no specific
    /// method handler matches.
    pub fn register_wildcard(&mut self, handler: impl Handler + 'static) -> Result<(), RegisterError> {
        if self.wildcard.is_some() {
            return Err(RegisterError::DuplicateWildcard);
        }
        self.wildcard = Some(Arc::new(handler));
        Ok(())
    }

    /// Remove a protocol-agnostic handler, if any.
    pub fn remove(&mut self, method: &str) {
        self.by_method.remove(method);
    }

    /// Resolve the handler to use for `method` under `protocol`, via the
    /// priority chain `protocol:method` → `method` → wildcard → none.
    pub fn resolve(&self, protocol: &str, method: &str) -> Option<Arc<dyn Handler>> {
        if let Some(h) = self
            .by_protocol_method
            .get(&(protocol.to_owned(), method.to_owned()))
        {
            return Some(Arc::clone(h));
        }
        if let Some(h) = self.by_method.get(method) {
            return Some(Arc::clone(h));
        }
        self.wildcard.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn ok_handler() -> impl Handler {
        |_params: Value| async move { Ok(HandlerOutcome::Reply(json!({}))) }
    }

    #[test]
    fn duplicate_method_registration_errors() {
        let mut reg = HandlerRegistry::new();
        reg.register("Heartbeat", ok_handler()).unwrap();
        let err = reg.register("Heartbeat", ok_handler()).unwrap_err();
        assert!(matches!(err, RegisterError::DuplicateMethod(_)));
    }

    #[test]
    fn duplicate_wildcard_registration_errors() {
        let mut reg = HandlerRegistry::new();
        reg.register_wildcard(ok_handler()).unwrap();
        assert!(matches!(
            reg.register_wildcard(ok_handler()),
            Err(RegisterError::DuplicateWildcard)
        ));
    }

    #[test]
    fn protocol_specific_handler_takes_priority() {
        let mut reg = HandlerRegistry::new();
        reg.register("Heartbeat", ok_handler()).unwrap();
        reg.register_for_protocol("ocpp2.0.1", "Heartbeat", ok_handler())
            .unwrap();
        assert!(reg.resolve("ocpp2.0.1", "Heartbeat").is_some());
        assert!(reg.resolve("ocpp1.6", "Heartbeat").is_some());
        assert!(reg.resolve("ocpp1.6", "Unknown").is_none());
    }

    #[test]
    fn remove_then_resolve_finds_nothing() {
        let mut reg = HandlerRegistry::new();
        reg.register("Heartbeat", ok_handler()).unwrap();
        reg.remove("Heartbeat");
        assert!(reg.resolve("ocpp1.6", "Heartbeat").is_none());
    }
}
