//! # rtplot-rs: real-time x/y streaming
//!
//! Streams incrementally produced (x, y) samples from a producer process to a
//! consumer process, which keeps them in a fixed-capacity rolling window for a
//! renderer to snapshot. Remote procedure calls share the same connection.
//!
//! ## Architecture
//!
//! - **Buffer**: [`RingBuffer`] pairs behind one mutex ([`SharedXyBuffers`])
//! - **Protocol**: handshake, then length-prefixed opcode frames
//! - **RPC**: request ids, caller futures, and a registered command table
//! - **Transport**: non-blocking TCP with readiness polling and reconnect
//! - **Event loop**: one thread per loop stepping cooperative [`Worker`]s
//! - **Manager**: spawns consumers and identifies them as they dial back
//!
//! ## Example
//!
//! ```ignore
//! use rtplot_rs::{
//!     config::AppConfig,
//!     event_loop::EventLoop,
//!     manager::{CommandSpawner, ConnectionManager},
//! };
//!
//! let config = AppConfig::load_or_default(None)?;
//! let mut manager = ConnectionManager::bind(config.clone())?;
//! let spawner = CommandSpawner::from_config(&config.manager)?;
//!
//! let connection = manager.spawn_consumer(&spawner)?;
//! let (producer, worker) = manager.open_stream(connection)?;
//!
//! let event_loop = EventLoop::spawn("producer", &config.event_loop)?;
//! event_loop.add(worker)?;
//!
//! producer.put_numeric_x_list_y_list(&[0.0, 1.0], &[0.5, 0.7])?;
//! let n: usize = producer
//!     .call("echo_len", vec!["hello".into()])?
//!     .wait_as(std::time::Duration::from_secs(1))?;
//! producer.close()?;
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod manager;
pub mod protocol;
pub mod rpc;
pub mod transport;
pub mod workers;

// Re-export commonly used types
pub use buffer::{RingBuffer, SharedXyBuffers, XyBuffers};
pub use config::AppConfig;
pub use error::{Result, RtPlotError};
pub use event_loop::{EventLoop, StepOutcome, Worker};
pub use protocol::{Dtype, Message, Opcode};
pub use rpc::{RpcError, RpcFuture};
pub use transport::Transport;
pub use workers::{ConsumerPump, Producer, ProducerWorker};
