//! Protocol workers driven by an [`EventLoop`](crate::event_loop::EventLoop)
//!
//! - [`Producer`] - cloneable handle application code writes samples and calls through
//! - [`ProducerWorker`] - drains the producer queue onto the wire, resolves RPC responses
//! - [`ConsumerPump`] - decodes frames into [`SharedXyBuffers`] and answers RPC requests
//! - [`LinkSupervisor`] - bounded reconnect with backoff used by both pumps
//!
//! Both sides are set up in two steps: run the handshake on a connected
//! [`Transport`], then register the returned worker with an event loop.
//!
//! ```ignore
//! let transport = Transport::connect(addr, (&config.transport).into())?;
//! let (producer, worker) = open_producer(transport, &config, "producer")?;
//! event_loop.add(worker)?;
//! producer.put_xy(0.0, 1.0)?;
//! let len = producer.call("echo_len", vec!["hello".into()])?.wait()?;
//! ```

mod consumer;
mod producer;
mod supervisor;

pub use consumer::ConsumerPump;
pub use producer::{Producer, ProducerWorker};
pub use supervisor::LinkSupervisor;

use crate::buffer::{lock_buffers, SharedXyBuffers, XyBuffers};
use crate::config::{AppConfig, EventLoopConfig};
use crate::error::Result;
use crate::protocol::Handshake;
use crate::rpc::{CommandTable, PendingCalls};
use crate::transport::{ReconnectPolicy, Transport};
use std::sync::{Arc, Mutex};

/// Bounds on how much a pump step reads before returning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimits {
    /// Scratch size of one `read_available` call
    pub chunk_bytes: usize,
    /// Reads per step; bytes left on the socket wait for the next cycle
    pub max_reads: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            chunk_bytes: 64 * 1024,
            max_reads: 16,
        }
    }
}

impl From<&EventLoopConfig> for ReadLimits {
    fn from(config: &EventLoopConfig) -> Self {
        Self {
            chunk_bytes: config.read_chunk_bytes.max(1),
            max_reads: config.max_reads_per_step.max(1),
        }
    }
}

/// Run the producer side of the handshake and build the handle/worker pair
pub fn open_producer(
    mut transport: Transport,
    config: &AppConfig,
    name: &str,
) -> Result<(Producer, ProducerWorker)> {
    let mut handshake = Handshake::new(config.transport.handshake_timeout());
    let negotiated = handshake.initiate(&mut transport, config.stream.handshake_record())?;

    let (tx, rx) = crossbeam_channel::bounded(config.stream.queue_capacity);
    let pending = Arc::new(Mutex::new(PendingCalls::new()));
    let producer = Producer::new(tx, Arc::clone(&pending));
    let worker = ProducerWorker::new(
        name,
        transport,
        negotiated.codec(),
        rx,
        pending,
        config.event_loop.batch_size,
        ReconnectPolicy::from(&config.reconnect),
    )
    .with_read_limits(ReadLimits::from(&config.event_loop));
    Ok((producer, worker))
}

/// Run the consumer side of the handshake and build the pump.
///
/// The buffers are sized from the received record and built before the
/// acknowledgement is sent, so a consumer that cannot hold the requested window
/// refuses the handshake. `commands` builds the RPC table with access to those
/// buffers; pass [`builtin_commands`] for the standard set.
pub fn accept_consumer<F>(
    mut transport: Transport,
    config: &AppConfig,
    name: &str,
    commands: F,
) -> Result<(ConsumerPump, SharedXyBuffers)>
where
    F: FnOnce(&SharedXyBuffers) -> Result<CommandTable>,
{
    let mut handshake = Handshake::new(config.transport.handshake_timeout());
    let (negotiated, (buffers, table)) = handshake.respond_with(&mut transport, |record| {
        let buffers = XyBuffers::shared(record.capacity)?;
        let table = commands(&buffers)?;
        Ok((buffers, Arc::new(table)))
    })?;

    let pump = ConsumerPump::new(
        name,
        transport,
        negotiated.codec(),
        Arc::clone(&buffers),
        table,
        ReconnectPolicy::from(&config.reconnect),
    )
    .with_read_limits(ReadLimits::from(&config.event_loop));
    Ok((pump, buffers))
}

/// Commands every consumer exposes:
///
/// - `echo_len(text)` - character count of `text`
/// - `point_count()` - samples currently buffered
/// - `clear()` - empty both buffers
pub fn builtin_commands(buffers: &SharedXyBuffers) -> Result<CommandTable> {
    let mut table = CommandTable::new();
    table.register("echo_len", |(text,): (String,)| Ok(text.chars().count()))?;

    let shared = Arc::clone(buffers);
    table.register_nullary("point_count", move || {
        lock_buffers(&shared)
            .map(|bufs| bufs.len())
            .map_err(|e| e.to_string())
    })?;

    let shared = Arc::clone(buffers);
    table.register_nullary("clear", move || {
        lock_buffers(&shared)
            .map(|mut bufs| bufs.clear())
            .map_err(|e| e.to_string())
    })?;
    Ok(table)
}
