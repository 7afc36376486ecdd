//! Producer-side facade and pump

use super::supervisor::LinkSupervisor;
use super::ReadLimits;
use crate::error::{Result, RtPlotError};
use crate::event_loop::{StepOutcome, Worker};
use crate::protocol::{FrameCodec, FrameDecoder, Message, ProtocolState};
use crate::rpc::{Kwargs, PendingCalls, RpcEnvelope, RpcError, RpcFuture, RpcRequest};
use crate::transport::{ReconnectPolicy, Transport};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

type SharedPending = Arc<Mutex<PendingCalls>>;

fn lock_pending(pending: &SharedPending) -> Result<MutexGuard<'_, PendingCalls>> {
    pending
        .lock()
        .map_err(|e| RtPlotError::Lock(format!("Failed to acquire pending-call lock: {}", e)))
}

/// Cloneable handle used by application code to feed a stream.
///
/// Every call copies its data into a queued message, so the caller may reuse
/// its slices immediately. The queue is bounded; `put_*` blocks while it is full.
#[derive(Clone)]
pub struct Producer {
    tx: Sender<Message>,
    pending: SharedPending,
}

impl Producer {
    pub(crate) fn new(tx: Sender<Message>, pending: SharedPending) -> Self {
        Self { tx, pending }
    }

    fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| RtPlotError::Channel("producer worker has stopped".to_string()))
    }

    pub fn put_xy(&self, x: f64, y: f64) -> Result<()> {
        self.send(Message::Xy { x, y })
    }

    pub fn put_xy_list(&self, pairs: &[(f64, f64)]) -> Result<()> {
        self.send(Message::XyList(pairs.to_vec()))
    }

    pub fn put_x_list_y_list(&self, xs: &[f64], ys: &[f64]) -> Result<()> {
        check_lengths(xs, ys)?;
        self.send(Message::XListYList {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
        })
    }

    pub fn put_numeric_xy_list(&self, pairs: &[(f64, f64)]) -> Result<()> {
        self.send(Message::NumericXyList(pairs.to_vec()))
    }

    pub fn put_numeric_x_list_y_list(&self, xs: &[f64], ys: &[f64]) -> Result<()> {
        check_lengths(xs, ys)?;
        self.send(Message::NumericXListYList {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
        })
    }

    /// Queue a call and return its future at once
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<RpcFuture> {
        self.call_with_kwargs(method, args, Kwargs::new())
    }

    pub fn call_with_kwargs(&self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<RpcFuture> {
        let future = lock_pending(&self.pending)?.register(method);
        let request = RpcRequest::new(future.id(), method, args, kwargs);
        if let Err(e) = self.send(Message::Rpc(RpcEnvelope::Request(request))) {
            lock_pending(&self.pending)?.cancel(future.id());
            return Err(e);
        }
        Ok(future)
    }

    /// Queue EXIT; the worker finishes once it has been written
    pub fn close(&self) -> Result<()> {
        self.send(Message::Exit)
    }

    /// Calls still waiting for a response
    pub fn pending_calls(&self) -> usize {
        lock_pending(&self.pending).map(|p| p.len()).unwrap_or(0)
    }
}

fn check_lengths(xs: &[f64], ys: &[f64]) -> Result<()> {
    if xs.len() != ys.len() {
        return Err(RtPlotError::Protocol(format!(
            "x/y length mismatch: {} != {}",
            xs.len(),
            ys.len()
        )));
    }
    Ok(())
}

/// Drains the producer queue onto the wire and resolves RPC responses
pub struct ProducerWorker {
    name: String,
    transport: Transport,
    codec: FrameCodec,
    rx: Receiver<Message>,
    pending: SharedPending,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    max_reads: usize,
    /// Encoded frames not yet written
    outbox: Vec<u8>,
    outbox_frames: u64,
    batch_size: usize,
    supervisor: LinkSupervisor,
    exit_queued: bool,
    state: ProtocolState,
    frames_sent: u64,
}

impl ProducerWorker {
    pub(crate) fn new(
        name: impl Into<String>,
        transport: Transport,
        codec: FrameCodec,
        rx: Receiver<Message>,
        pending: SharedPending,
        batch_size: usize,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            codec,
            rx,
            pending,
            decoder: FrameDecoder::new(codec),
            read_buf: vec![0; ReadLimits::default().chunk_bytes],
            max_reads: ReadLimits::default().max_reads,
            outbox: Vec::new(),
            outbox_frames: 0,
            batch_size: batch_size.max(1),
            supervisor: LinkSupervisor::new(policy),
            exit_queued: false,
            state: ProtocolState::Pump,
            frames_sent: 0,
        }
    }

    pub(crate) fn with_read_limits(mut self, limits: ReadLimits) -> Self {
        self.read_buf = vec![0; limits.chunk_bytes.max(1)];
        self.max_reads = limits.max_reads.max(1);
        self
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn reconnect_count(&self) -> u64 {
        self.transport.reconnect_count()
    }

    fn on_error(&mut self, error: RtPlotError) -> Result<StepOutcome> {
        if !error.is_recoverable() {
            return Err(error);
        }
        self.decoder.clear();
        self.supervisor.connection_lost(&mut self.transport, &error)?;
        Ok(StepOutcome::Progress)
    }

    fn handle_incoming(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Rpc(RpcEnvelope::Response(response)) => {
                let id = response.id;
                match lock_pending(&self.pending)?.resolve(response) {
                    Ok(()) => tracing::trace!("{} resolved RPC {}", self.name, id),
                    Err(RtPlotError::UnknownRpcId(id)) => {
                        tracing::warn!("{} dropping response for unknown RPC id {}", self.name, id)
                    }
                    Err(e) => return Err(e),
                }
            }
            other => {
                tracing::warn!("{} ignoring unexpected {} from consumer", self.name, other.opcode())
            }
        }
        Ok(())
    }

    /// Move up to `batch_size` queued messages into the outbox
    fn fill_outbox(&mut self) {
        for _ in 0..self.batch_size {
            let message = match self.rx.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::debug!("{}: all producer handles dropped, closing", self.name);
                    Message::Exit
                }
            };
            let is_exit = matches!(message, Message::Exit);

            if let Err(e) = self.codec.encode_into(&message, &mut self.outbox) {
                tracing::error!("{} dropping unencodable {}: {}", self.name, message.opcode(), e);
                if let Message::Rpc(RpcEnvelope::Request(request)) = &message {
                    if let Ok(mut pending) = lock_pending(&self.pending) {
                        pending.cancel(request.id);
                    }
                }
                continue;
            }
            self.outbox_frames += 1;
            if is_exit {
                self.exit_queued = true;
                break;
            }
        }
    }
}

impl Worker for ProducerWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<StepOutcome> {
        if self.state == ProtocolState::Closed {
            return Ok(StepOutcome::Exhausted);
        }
        if !self.supervisor.ensure_up(&mut self.transport)? {
            return Ok(StepOutcome::Idle);
        }

        let mut progressed = false;
        if self.transport.poll().readable {
            for _ in 0..self.max_reads {
                match self.transport.read_available(&mut self.read_buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        self.decoder.feed(&self.read_buf[..n]);
                        while let Some(message) = self.decoder.next_message()? {
                            self.handle_incoming(message)?;
                        }
                        progressed = true;
                        if n < self.read_buf.len() {
                            break;
                        }
                    }
                    Err(e) => return self.on_error(e),
                }
            }
        }

        if self.outbox.is_empty() && !self.exit_queued {
            self.fill_outbox();
        }
        if !self.outbox.is_empty() {
            if let Err(e) = self.transport.write(&self.outbox) {
                return self.on_error(e);
            }
            self.frames_sent += std::mem::take(&mut self.outbox_frames);
            self.outbox.clear();
            progressed = true;

            if self.exit_queued {
                tracing::info!("{} sent EXIT", self.name);
                self.state = ProtocolState::Closed;
                return Ok(StepOutcome::Exhausted);
            }
        }

        Ok(if progressed {
            StepOutcome::Progress
        } else {
            StepOutcome::Idle
        })
    }
}

impl Drop for ProducerWorker {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            if !pending.is_empty() {
                tracing::debug!("{} failing {} outstanding calls", self.name, pending.len());
            }
            pending.fail_all(RpcError::Disconnected);
        }
    }
}
