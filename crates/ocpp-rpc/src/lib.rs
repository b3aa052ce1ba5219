//! OCPP WebSocket RPC: the facade crate.
//!
//! Everything else in this workspace is a leaf crate grounded on one
//! piece of the spec; this crate exists only to re-export the surface
//! applications actually use, the way a top-level `arti` crate would
//! re-export `tor-rtcompat`/`tor-circmgr`/etc. for downstream users who
//! shouldn't need to depend on each leaf crate by name.

#![warn(missing_docs)]

pub use ocpp_adaptive::{Adapted, AdaptiveConfig, AdaptiveLimiter, LoadSample, LoadSampler};
pub use ocpp_frame::{
    decode, encode, Call, CallError, CallResult, DecodeError, DecodeFailure, Frame,
    HasRpcErrorCode, MessageId, RpcErrorCode,
};
pub use ocpp_middleware::{
    Body, Context, ContextKind, Middleware, MiddlewareError, Next, Stack, Terminal,
};
pub use ocpp_peer::{
    CallFailure, CallOptions, CancelHandle, CloseOptions, ConnectFailure, Connector, Handler,
    HandlerError, HandlerOutcome, HandlerRegistry, Peer, PeerConfig, PeerConfigBuilder, PeerEvent,
    PeerState, RegisterError, SecurityEvent, Transport, TransportError,
};
pub use ocpp_ratelimit::{Clock, RateLimiter, SystemClock};
pub use ocpp_router::{Matched, Route, RouteConfig, Router, RouterError};
pub use ocpp_server::{
    accept_connection, AcceptAll, AcceptError, AuthCallback, AuthDecision, ConnectionMiddleware,
    Handshake, HandshakeError, Listener, SecurityProfile, ServerConfig, ServerConfigBuilder,
    ServerEvent, TlsContext, TlsMaterial, TlsUpdate,
};
pub use ocpp_validate::{
    naming_for_protocol, schema_id, Facet, SchemaNaming, StrictMode, ValidationFailure, Validator,
    ValidatorRegistry,
};
