//! Caller-side handles and the pending-call table

use super::{RpcError, RpcOutcome, RpcResponse};
use crate::error::{Result, RtPlotError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

type Completion = std::result::Result<Value, RpcError>;

/// Placeholder for the result of an outstanding call.
///
/// Resolved asynchronously when the matching response is pumped. If the
/// producer worker goes away first, the future yields [`RpcError::Disconnected`].
#[derive(Debug)]
pub struct RpcFuture {
    id: u64,
    method: String,
    rx: Receiver<Completion>,
}

impl RpcFuture {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Block until the response arrives
    pub fn wait(self) -> Completion {
        self.rx.recv().unwrap_or(Err(RpcError::Disconnected))
    }

    /// Block for at most `timeout`
    pub fn wait_timeout(self, timeout: Duration) -> Completion {
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => completion,
            Err(RecvTimeoutError::Timeout) => Err(RpcError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::Disconnected),
        }
    }

    /// Wait and deserialize the returned value
    pub fn wait_as<T: DeserializeOwned>(self, timeout: Duration) -> Result<T> {
        let method = self.method.clone();
        let value = self.wait_timeout(timeout)?;
        serde_json::from_value(value).map_err(|e| {
            RtPlotError::Serialization(format!("Unexpected result type from '{}': {}", method, e))
        })
    }

    /// Non-blocking poll; `None` while still pending
    pub fn try_take(&self) -> Option<Completion> {
        match self.rx.try_recv() {
            Ok(completion) => Some(completion),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(RpcError::Disconnected)),
        }
    }
}

struct PendingCall {
    method: String,
    tx: Sender<Completion>,
}

/// Outstanding calls of one connection, keyed by request id
#[derive(Default)]
pub struct PendingCalls {
    next_id: u64,
    calls: HashMap<u64, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and register a caller for it
    pub fn register(&mut self, method: &str) -> RpcFuture {
        self.next_id += 1;
        let id = self.next_id;
        let (tx, rx) = bounded(1);
        self.calls.insert(
            id,
            PendingCall {
                method: method.to_string(),
                tx,
            },
        );
        RpcFuture {
            id,
            method: method.to_string(),
            rx,
        }
    }

    /// Remove an entry whose request never made it onto the queue
    pub fn cancel(&mut self, id: u64) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Hand a response to its caller, removing the entry.
    ///
    /// Fails with [`RtPlotError::UnknownRpcId`] when no caller is waiting on the id.
    pub fn resolve(&mut self, response: RpcResponse) -> Result<()> {
        let call = self
            .calls
            .remove(&response.id)
            .ok_or(RtPlotError::UnknownRpcId(response.id))?;

        let completion = match response.outcome {
            RpcOutcome::Value(value) => Ok(value),
            RpcOutcome::Error(fault) => Err(RpcError::from_fault(&call.method, fault)),
        };
        // The caller may have dropped its future; nothing to deliver then
        let _ = call.tx.send(completion);
        Ok(())
    }

    /// Fail every outstanding call with the same error
    pub fn fail_all(&mut self, error: RpcError) {
        for (_, call) in self.calls.drain() {
            let _ = call.tx.send(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.calls.contains_key(&id)
    }
}
