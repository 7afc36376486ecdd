//! Error handling for rtplot-rs
//!
//! This module defines the error taxonomy shared by every layer of the data
//! plane and a Result alias for use throughout the crate.
//!
//! Only [`RtPlotError::ConnectionLost`] is recoverable: the pump that observes it
//! reconnects and keeps going. Everything else is fatal for the worker, the
//! connection attempt, or the single call that produced it.

use crate::rpc::RpcError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for rtplot-rs operations
#[derive(Error, Debug)]
pub enum RtPlotError {
    /// Invalid capacity or configuration, raised at construction
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wire-level handshake mismatch (bad record, wrong token, timeout)
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Manager identification line mismatch
    #[error("Manager handshake error: {0}")]
    ManagerHandshake(String),

    /// Peer went away mid-stream; the pump reconnects
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Connect or reconnect failed, or a write was only partially delivered
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unknown opcode or malformed frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Bulk insert larger than the ring buffer
    #[error("Capacity error: {requested} values exceed buffer capacity {capacity}")]
    Capacity { requested: usize, capacity: usize },

    /// No inbound connection from a spawned child before the deadline
    #[error("Spawned process did not connect within {0:?}")]
    SpawnTimeout(Duration),

    /// Response for an id with no pending caller
    #[error("Unknown RPC id: {0}")]
    UnknownRpcId(u64),

    /// Call-level RPC failure
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// A worker step panicked
    #[error("Worker panicked: {0}")]
    WorkerPanic(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// A mutex was poisoned by a panicking holder
    #[error("Lock error: {0}")]
    Lock(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RtPlotError>,
    },
}

impl RtPlotError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RtPlotError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether a pump should absorb this error and reconnect
    pub fn is_recoverable(&self) -> bool {
        match self {
            RtPlotError::ConnectionLost(_) => true,
            RtPlotError::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RtPlotError {
    fn from(err: serde_json::Error) -> Self {
        RtPlotError::Serialization(err.to_string())
    }
}

/// Result type alias for rtplot-rs operations
pub type Result<T> = std::result::Result<T, RtPlotError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
