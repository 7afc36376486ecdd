//! Consumer-side pump: frames in, buffers and RPC responses out

use super::supervisor::LinkSupervisor;
use super::ReadLimits;
use crate::buffer::{lock_buffers, SharedXyBuffers};
use crate::error::{Result, RtPlotError};
use crate::event_loop::{StepOutcome, Worker};
use crate::protocol::{FrameCodec, FrameDecoder, Message, ProtocolState};
use crate::rpc::{CommandTable, RpcEnvelope};
use crate::transport::{ReconnectPolicy, Transport};
use std::sync::Arc;

/// Reads frames and routes them into a shared x/y buffer pair.
///
/// RPC requests are run against the command table and answered on the same
/// connection. A lost connection is restored through the [`LinkSupervisor`]
/// without touching buffered samples; a partially received frame is dropped.
pub struct ConsumerPump {
    name: String,
    transport: Transport,
    codec: FrameCodec,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    max_reads: usize,
    outbox: Vec<u8>,
    buffers: SharedXyBuffers,
    commands: Arc<CommandTable>,
    supervisor: LinkSupervisor,
    state: ProtocolState,
    current_update: u64,
}

impl ConsumerPump {
    pub fn new(
        name: impl Into<String>,
        transport: Transport,
        codec: FrameCodec,
        buffers: SharedXyBuffers,
        commands: Arc<CommandTable>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            codec,
            decoder: FrameDecoder::new(codec),
            read_buf: vec![0; ReadLimits::default().chunk_bytes],
            max_reads: ReadLimits::default().max_reads,
            outbox: Vec::new(),
            buffers,
            commands,
            supervisor: LinkSupervisor::new(policy),
            state: ProtocolState::Pump,
            current_update: 0,
        }
    }

    /// Cap the bytes one step may pull off the socket
    pub fn with_read_limits(mut self, limits: ReadLimits) -> Self {
        self.read_buf = vec![0; limits.chunk_bytes.max(1)];
        self.max_reads = limits.max_reads.max(1);
        self
    }

    pub fn buffers(&self) -> &SharedXyBuffers {
        &self.buffers
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Messages applied since the pump started
    pub fn current_update(&self) -> u64 {
        self.current_update
    }

    pub fn reconnect_count(&self) -> u64 {
        self.transport.reconnect_count()
    }

    /// Decode every complete frame buffered so far
    fn drain_decoder(&mut self) -> Result<()> {
        while self.state == ProtocolState::Pump {
            match self.decoder.next_message()? {
                Some(message) => self.apply(message)?,
                None => break,
            }
        }
        Ok(())
    }

    fn apply(&mut self, message: Message) -> Result<()> {
        tracing::trace!("{} <- {} ({} samples)", self.name, message.opcode(), message.sample_count());
        self.current_update += 1;
        match message {
            Message::Xy { x, y } => lock_buffers(&self.buffers)?.put_xy(x, y),
            Message::XyList(pairs) | Message::NumericXyList(pairs) => {
                lock_buffers(&self.buffers)?.put_pairs(&pairs)
            }
            Message::XListYList { xs, ys } | Message::NumericXListYList { xs, ys } => {
                lock_buffers(&self.buffers)?.extend_xy(&xs, &ys)?
            }
            Message::Exit => {
                tracing::info!("{} received EXIT after {} messages", self.name, self.current_update);
                self.state = ProtocolState::Closed;
            }
            Message::Rpc(RpcEnvelope::Request(request)) => {
                let response = self.commands.dispatch(&request);
                self.codec
                    .encode_into(&Message::Rpc(RpcEnvelope::Response(response)), &mut self.outbox)?;
            }
            Message::Rpc(RpcEnvelope::Response(response)) => {
                tracing::warn!("{} ignoring unsolicited RPC response {}", self.name, response.id);
            }
        }
        Ok(())
    }

    /// Handle a transport error: recoverable ones trigger a reconnect
    fn on_error(&mut self, error: RtPlotError) -> Result<StepOutcome> {
        if !error.is_recoverable() {
            return Err(error);
        }
        self.decoder.clear();
        self.supervisor.connection_lost(&mut self.transport, &error)?;
        Ok(StepOutcome::Progress)
    }

    fn flush(&mut self) -> Result<bool> {
        if self.outbox.is_empty() {
            return Ok(false);
        }
        self.transport.write(&self.outbox)?;
        self.outbox.clear();
        Ok(true)
    }
}

impl Worker for ConsumerPump {
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
                        self.drain_decoder()?;
                        progressed = true;
                        if n < self.read_buf.len() || self.state != ProtocolState::Pump {
                            break;
                        }
                    }
                    Err(e) => return self.on_error(e),
                }
            }
        }

        match self.flush() {
            Ok(wrote) => progressed |= wrote,
            Err(e) => return self.on_error(e),
        }

        if self.state == ProtocolState::Closed {
            self.transport.shutdown();
            return Ok(StepOutcome::Exhausted);
        }
        Ok(if progressed {
            StepOutcome::Progress
        } else {
            StepOutcome::Idle
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::XyBuffers;
    use crate::transport::{accept_before, TransportOptions};
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn connected_pump(limits: ReadLimits) -> (Transport, ConsumerPump) {
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").unwrap());
        let addr = listener.local_addr().unwrap();
        let producer = Transport::connect(addr, TransportOptions::default()).unwrap();
        let stream = accept_before(
            &listener,
            Instant::now() + Duration::from_secs(2),
            Duration::from_millis(1),
        )
        .unwrap()
        .unwrap();
        let transport =
            Transport::from_accepted(stream, listener, TransportOptions::default()).unwrap();
        let pump = ConsumerPump::new(
            "pump",
            transport,
            FrameCodec::default(),
            XyBuffers::shared(64).unwrap(),
            Arc::new(CommandTable::new()),
            ReconnectPolicy::default(),
        )
        .with_read_limits(limits);
        (producer, pump)
    }

    fn buffered(pump: &ConsumerPump) -> usize {
        lock_buffers(pump.buffers()).unwrap().len()
    }

    #[test]
    fn test_step_reads_at_most_its_limit() {
        let limits = ReadLimits {
            chunk_bytes: 16,
            max_reads: 1,
        };
        let (mut producer, mut pump) = connected_pump(limits);

        let codec = FrameCodec::default();
        let mut stream = Vec::new();
        for i in 0..10 {
            codec
                .encode_into(&Message::Xy { x: f64::from(i), y: 0.0 }, &mut stream)
                .unwrap();
        }
        // Every XY frame here is 15 bytes, so one 16-byte read holds one frame
        assert_eq!(stream.len(), 150);
        producer.write(&stream).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(pump.step().unwrap(), StepOutcome::Progress);
        assert_eq!(buffered(&pump), 1);

        let deadline = Instant::now() + Duration::from_secs(2);
        while buffered(&pump) < 10 && Instant::now() < deadline {
            pump.step().unwrap();
        }
        assert_eq!(buffered(&pump), 10);
        let xs = lock_buffers(pump.buffers()).unwrap().snapshot().0;
        assert_eq!(xs, (0..10).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn test_exit_closes_pump() {
        let (mut producer, mut pump) = connected_pump(ReadLimits::default());
        let codec = FrameCodec::default();
        let mut stream = Vec::new();
        codec.encode_into(&Message::Xy { x: 1.0, y: 2.0 }, &mut stream).unwrap();
        codec.encode_into(&Message::Exit, &mut stream).unwrap();
        producer.write(&stream).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut outcome = StepOutcome::Idle;
        while outcome != StepOutcome::Exhausted && Instant::now() < deadline {
            outcome = pump.step().unwrap();
        }
        assert_eq!(outcome, StepOutcome::Exhausted);
        assert_eq!(pump.state(), ProtocolState::Closed);
        assert_eq!(pump.current_update(), 2);
        assert_eq!(buffered(&pump), 1);
    }
}
