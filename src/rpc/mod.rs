//! Out-of-band remote procedure calls
//!
//! RPC messages share the data connection, carried inside
//! [`Opcode::Rpc`](crate::protocol::Opcode::Rpc) frames as a JSON [`RpcEnvelope`].
//!
//! # Flow
//!
//! 1. The producer calls [`Producer::call`](crate::workers::Producer::call). A fresh id
//!    is allocated in [`PendingCalls`], an [`RpcFuture`] is handed back at once and
//!    the request is queued behind any data already waiting.
//! 2. The consumer pump looks the method up in its [`CommandTable`], runs it, and
//!    queues exactly one [`RpcResponse`] with the same id.
//! 3. The producer worker resolves the pending entry. Responses for ids that are
//!    not pending (stale or duplicate) are logged and dropped.
//!
//! Methods are never resolved by reflection: only names registered in the table
//! can be invoked, and unknown names are rejected before any handler runs.

mod commands;
mod future;

pub use commands::CommandTable;
pub use future::{PendingCalls, RpcFuture};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Keyword arguments of a call
pub type Kwargs = Map<String, Value>;

/// A call as it travels from producer to consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            id,
            method: method.into(),
            args,
            kwargs,
        }
    }

    /// Build the response to this request
    pub fn respond(&self, outcome: RpcOutcome) -> RpcResponse {
        RpcResponse {
            id: self.id,
            outcome,
        }
    }
}

/// Result of running a request on the consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub outcome: RpcOutcome,
}

/// Either the return value or the captured failure, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcOutcome {
    Value(Value),
    Error(RemoteFault),
}

/// Failure reported by the consumer side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub kind: FaultKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Name not present in the command table
    UnknownMethod,
    /// Arguments did not match the handler signature
    InvalidArguments,
    /// The handler ran and returned an error
    Failed,
}

impl RemoteFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Payload of an RPC frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcEnvelope {
    Request(RpcRequest),
    Response(RpcResponse),
}

/// What a caller's [`RpcFuture`] resolves to on failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("method '{0}' is not registered")]
    UnknownMethod(String),

    #[error("invalid arguments for '{method}': {message}")]
    InvalidArguments { method: String, message: String },

    #[error("'{method}' failed: {message}")]
    Remote { method: String, message: String },

    #[error("connection closed before a response arrived")]
    Disconnected,

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl RpcError {
    /// Map a fault received over the wire to the caller-facing error
    pub fn from_fault(method: &str, fault: RemoteFault) -> Self {
        match fault.kind {
            FaultKind::UnknownMethod => RpcError::UnknownMethod(method.to_string()),
            FaultKind::InvalidArguments => RpcError::InvalidArguments {
                method: method.to_string(),
                message: fault.message,
            },
            FaultKind::Failed => RpcError::Remote {
                method: method.to_string(),
                message: fault.message,
            },
        }
    }
}
