//! Wire frame codec and RPC error taxonomy for the OCPP WebSocket RPC
//! protocol.
//!
//! This crate covers the two lowest-level, leaf components from the system
//! overview: the **Frame Codec** (parsing and serializing the three OCPP
//! message tuples) and the **Error Taxonomy** (the fixed vocabulary of RPC
//! error codes). Every other crate in the workspace builds on top of the
//! types here.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codec;
mod message;
mod taxonomy;

pub use codec::{decode, encode, DecodeError, DecodeFailure};
pub use message::{Call, CallError, CallResult, Frame, MessageId, CALL, CALLERROR, CALLRESULT};
pub use taxonomy::{HasRpcErrorCode, LocalFailure, RpcErrorCode};
