//! Registered command table for the consumer side

use super::{FaultKind, RemoteFault, RpcOutcome, RpcRequest, RpcResponse};
use crate::error::{Result, RtPlotError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

type Handler = Box<dyn Fn(&RpcRequest) -> std::result::Result<Value, RemoteFault> + Send + Sync>;

/// Maps method names to handlers.
///
/// Names are validated when registered (non-empty identifier, no duplicates),
/// and dispatch rejects anything not registered before running code.
#[derive(Default)]
pub struct CommandTable {
    handlers: BTreeMap<String, Handler>,
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that sees the raw request (args and kwargs)
    pub fn register_raw<F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&RpcRequest) -> std::result::Result<Value, RemoteFault> + Send + Sync + 'static,
    {
        validate_name(name)?;
        if self.handlers.contains_key(name) {
            return Err(RtPlotError::Config(format!(
                "RPC method '{}' is already registered",
                name
            )));
        }
        self.handlers.insert(name.to_string(), Box::new(handler));
        Ok(())
    }

    /// Register a typed handler over positional arguments.
    ///
    /// The argument array is deserialized into `A`, so a handler taking one string
    /// uses `A = (String,)`. Keyword arguments are rejected.
    pub fn register<A, R, F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> std::result::Result<R, String> + Send + Sync + 'static,
    {
        self.register_raw(name, move |req| {
            reject_kwargs(req)?;
            let args: A = serde_json::from_value(Value::Array(req.args.clone()))
                .map_err(|e| RemoteFault::new(FaultKind::InvalidArguments, e.to_string()))?;
            let value = handler(args).map_err(|e| RemoteFault::new(FaultKind::Failed, e))?;
            to_value(value)
        })
    }

    /// Register a handler that takes no arguments
    pub fn register_nullary<R, F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        R: Serialize,
        F: Fn() -> std::result::Result<R, String> + Send + Sync + 'static,
    {
        self.register_raw(name, move |req| {
            reject_kwargs(req)?;
            if !req.args.is_empty() {
                return Err(RemoteFault::new(
                    FaultKind::InvalidArguments,
                    format!("expected no arguments, got {}", req.args.len()),
                ));
            }
            let value = handler().map_err(|e| RemoteFault::new(FaultKind::Failed, e))?;
            to_value(value)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run a request, producing exactly one response with the same id
    pub fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let outcome = match self.handlers.get(&request.method) {
            Some(handler) => match handler(request) {
                Ok(value) => RpcOutcome::Value(value),
                Err(fault) => {
                    tracing::debug!(
                        "RPC '{}' (id {}) failed: {}",
                        request.method,
                        request.id,
                        fault.message
                    );
                    RpcOutcome::Error(fault)
                }
            },
            None => {
                tracing::warn!("Rejected call to unregistered RPC method '{}'", request.method);
                RpcOutcome::Error(RemoteFault::new(
                    FaultKind::UnknownMethod,
                    format!("method '{}' is not registered", request.method),
                ))
            }
        };
        request.respond(outcome)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(RtPlotError::Config(format!("Invalid RPC method name '{}'", name)))
    }
}

fn reject_kwargs(req: &RpcRequest) -> std::result::Result<(), RemoteFault> {
    if req.kwargs.is_empty() {
        Ok(())
    } else {
        Err(RemoteFault::new(
            FaultKind::InvalidArguments,
            "keyword arguments are not accepted",
        ))
    }
}

fn to_value<R: Serialize>(value: R) -> std::result::Result<Value, RemoteFault> {
    serde_json::to_value(value).map_err(|e| RemoteFault::new(FaultKind::Failed, e.to_string()))
}
