//! One-time configuration exchange before the data stream
//!
//! ```text
//! producer                               consumer
//!   "RTPH" | ver:u8 | len:u32 | JSON  ->
//!                                     <-  "ACK YAY\n"
//! ```
//!
//! Any mismatch closes the connection; no retry happens at this layer.

use super::codec::{Dtype, FrameCodec};
use crate::error::{Result, RtPlotError};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const HANDSHAKE_MAGIC: [u8; 4] = *b"RTPH";
pub const HANDSHAKE_VERSION: u8 = 1;
pub const ACK_TOKEN: [u8; 8] = *b"ACK YAY\n";

/// Largest ring capacity a consumer agrees to allocate
pub const MAX_CAPACITY: usize = 10_000_000;

const HEADER_LEN: usize = 9;
const MAX_RECORD_LEN: usize = 64 * 1024;

/// Shared stream configuration sent once by the producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRecord {
    pub capacity: usize,
    pub style: String,
    pub dtype: Dtype,
}

impl HandshakeRecord {
    pub fn new(capacity: usize, style: impl Into<String>, dtype: Dtype) -> Self {
        Self {
            capacity,
            style: style.into(),
            dtype,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(RtPlotError::Handshake("capacity must be positive".to_string()));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(RtPlotError::Handshake(format!(
                "capacity {} exceeds limit of {}",
                self.capacity, MAX_CAPACITY
            )));
        }
        if self.style.trim().is_empty() {
            return Err(RtPlotError::Handshake("style label is empty".to_string()));
        }
        Ok(())
    }

    /// Magic, version, length prefix and JSON body
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&HANDSHAKE_MAGIC);
        out.push(HANDSHAKE_VERSION);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Check a received header; returns the body length that follows
    fn parse_header(header: &[u8; HEADER_LEN]) -> Result<usize> {
        if header[..4] != HANDSHAKE_MAGIC {
            return Err(RtPlotError::Handshake(format!(
                "bad magic {:?}",
                String::from_utf8_lossy(&header[..4])
            )));
        }
        if header[4] != HANDSHAKE_VERSION {
            return Err(RtPlotError::Handshake(format!(
                "unsupported handshake version {}",
                header[4]
            )));
        }
        let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
        if len == 0 || len > MAX_RECORD_LEN {
            return Err(RtPlotError::Handshake(format!("record length {} out of range", len)));
        }
        Ok(len)
    }

    fn from_body(body: &[u8]) -> Result<Self> {
        let record: Self = serde_json::from_slice(body)
            .map_err(|e| RtPlotError::Handshake(format!("malformed record: {}", e)))?;
        record.validate()?;
        Ok(record)
    }
}

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Startup,
    Handshake,
    Pump,
    Closed,
}

/// Outcome of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub record: HandshakeRecord,
}

impl Negotiated {
    /// Codec for the negotiated dtype
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.record.dtype)
    }
}

/// Drives one connection from `Startup` to `Pump`
#[derive(Debug)]
pub struct Handshake {
    state: ProtocolState,
    timeout: Duration,
}

impl Handshake {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: ProtocolState::Startup,
            timeout,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Producer side: send `record` and wait for the acknowledgement
    pub fn initiate(
        &mut self,
        transport: &mut Transport,
        record: HandshakeRecord,
    ) -> Result<Negotiated> {
        self.begin()?;
        let deadline = Instant::now() + self.timeout;

        let result = (|| -> Result<()> {
            record.validate()?;
            transport
                .write(&record.to_bytes()?)
                .map_err(|e| RtPlotError::Handshake(format!("sending record failed: {}", e)))?;

            let mut token = [0u8; ACK_TOKEN.len()];
            transport
                .read_exact_until(&mut token, deadline)
                .map_err(|e| RtPlotError::Handshake(format!("no acknowledgement: {}", e)))?;
            if token != ACK_TOKEN {
                return Err(RtPlotError::Handshake(format!(
                    "unexpected acknowledgement {:?}",
                    String::from_utf8_lossy(&token)
                )));
            }
            Ok(())
        })();

        self.finish(transport, result)?;
        tracing::info!(
            "Handshake complete: capacity={} style={} dtype={}",
            record.capacity,
            record.style,
            record.dtype
        );
        Ok(Negotiated { record })
    }

    /// Consumer side: receive the record and acknowledge it
    pub fn respond(&mut self, transport: &mut Transport) -> Result<Negotiated> {
        self.respond_with(transport, |_| Ok(()))
            .map(|(negotiated, ())| negotiated)
    }

    /// Consumer side, running `prepare` on the validated record before the
    /// acknowledgement goes out.
    ///
    /// A `prepare` failure is a [`RtPlotError::Handshake`]: the producer never
    /// sees the token and the connection is closed.
    pub fn respond_with<T, F>(
        &mut self,
        transport: &mut Transport,
        prepare: F,
    ) -> Result<(Negotiated, T)>
    where
        F: FnOnce(&HandshakeRecord) -> Result<T>,
    {
        self.begin()?;
        let deadline = Instant::now() + self.timeout;

        let result = (|| -> Result<(HandshakeRecord, T)> {
            let mut header = [0u8; HEADER_LEN];
            transport
                .read_exact_until(&mut header, deadline)
                .map_err(|e| RtPlotError::Handshake(format!("no record received: {}", e)))?;
            let len = HandshakeRecord::parse_header(&header)?;

            let mut body = vec![0u8; len];
            transport
                .read_exact_until(&mut body, deadline)
                .map_err(|e| RtPlotError::Handshake(format!("truncated record: {}", e)))?;
            let record = HandshakeRecord::from_body(&body)?;
            let prepared = prepare(&record)
                .map_err(|e| RtPlotError::Handshake(format!("cannot accept record: {}", e)))?;

            transport.write(&ACK_TOKEN).map_err(|e| {
                RtPlotError::Handshake(format!("sending acknowledgement failed: {}", e))
            })?;
            Ok((record, prepared))
        })();

        let (record, prepared) = self.finish(transport, result)?;
        tracing::info!(
            "Handshake accepted: capacity={} style={} dtype={}",
            record.capacity,
            record.style,
            record.dtype
        );
        Ok((Negotiated { record }, prepared))
    }

    /// Mark the connection closed after EXIT or teardown
    pub fn close(&mut self) {
        self.state = ProtocolState::Closed;
    }

    fn begin(&mut self) -> Result<()> {
        if self.state != ProtocolState::Startup {
            return Err(RtPlotError::Handshake(format!(
                "handshake already attempted (state {:?})",
                self.state
            )));
        }
        self.state = ProtocolState::Handshake;
        Ok(())
    }

    fn finish<T>(&mut self, transport: &mut Transport, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = ProtocolState::Pump;
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("Handshake failed: {}", e);
                self.state = ProtocolState::Closed;
                transport.shutdown();
                Err(e)
            }
        }
    }
}
