//! Length-prefixed frame encoding
//!
//! ```text
//! len:u32 LE | version:u8 | opcode:u8 | payload[len - 2]
//! ```
//!
//! Structured payloads are JSON. The two numeric opcodes carry raw
//! little-endian floats whose width is fixed by the negotiated [`Dtype`].

use super::message::{Message, Opcode};
use crate::error::{Result, RtPlotError};
use crate::rpc::RpcEnvelope;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frame layout version written into every frame
pub const FRAME_VERSION: u8 = 1;

/// Largest accepted value of the length prefix
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
const FRAME_HEADER: usize = 2;

/// Float width of numeric payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Float32,
    #[default]
    Float64,
}

impl Dtype {
    /// Bytes per encoded value
    pub fn width(self) -> usize {
        match self {
            Dtype::Float32 => 4,
            Dtype::Float64 => 8,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Dtype {
    type Err = RtPlotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "float32" | "f32" => Ok(Dtype::Float32),
            "float64" | "f64" => Ok(Dtype::Float64),
            other => Err(RtPlotError::Config(format!("Unknown dtype '{}'", other))),
        }
    }
}

/// Encodes and decodes frames for one negotiated dtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCodec {
    dtype: Dtype,
}

impl FrameCodec {
    pub fn new(dtype: Dtype) -> Self {
        Self { dtype }
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(message, &mut out)?;
        Ok(out)
    }

    /// Append one frame to `out`. On error `out` is left as it was.
    pub fn encode_into(&self, message: &Message, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        out.extend_from_slice(&[0; LEN_PREFIX]);
        out.push(FRAME_VERSION);
        out.push(message.opcode().as_u8());

        if let Err(e) = self.encode_payload(message, out) {
            out.truncate(start);
            return Err(e);
        }

        let len = out.len() - start - LEN_PREFIX;
        if len > MAX_FRAME_LEN {
            out.truncate(start);
            return Err(RtPlotError::Protocol(format!(
                "frame of {} bytes exceeds limit of {}",
                len, MAX_FRAME_LEN
            )));
        }
        out[start..start + LEN_PREFIX].copy_from_slice(&(len as u32).to_le_bytes());
        Ok(())
    }

    fn encode_payload(&self, message: &Message, out: &mut Vec<u8>) -> Result<()> {
        match message {
            Message::Xy { x, y } => serde_json::to_writer(&mut *out, &(x, y))?,
            Message::XyList(pairs) => serde_json::to_writer(&mut *out, pairs)?,
            Message::XListYList { xs, ys } => {
                check_columns(xs, ys)?;
                serde_json::to_writer(&mut *out, &(xs, ys))?
            }
            Message::Exit => {}
            Message::NumericXyList(pairs) => {
                out.reserve(pairs.len() * 2 * self.dtype.width());
                for &(x, y) in pairs {
                    self.write_float(x, out);
                    self.write_float(y, out);
                }
            }
            Message::NumericXListYList { xs, ys } => {
                check_columns(xs, ys)?;
                let n = u32::try_from(xs.len()).map_err(|_| {
                    RtPlotError::Protocol(format!("{} samples do not fit a frame", xs.len()))
                })?;
                out.reserve(LEN_PREFIX + xs.len() * 2 * self.dtype.width());
                out.extend_from_slice(&n.to_le_bytes());
                for &v in xs.iter().chain(ys.iter()) {
                    self.write_float(v, out);
                }
            }
            Message::Rpc(envelope) => serde_json::to_writer(&mut *out, envelope)?,
        }
        Ok(())
    }

    #[inline]
    fn write_float(&self, value: f64, out: &mut Vec<u8>) {
        match self.dtype {
            Dtype::Float32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
            Dtype::Float64 => out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    /// Decode the first complete frame in `buf`.
    ///
    /// Returns the message and the number of bytes it occupied, or `None` when
    /// more bytes are needed.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Message, usize)>> {
        if buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&buf[..LEN_PREFIX]);
        let len = u32::from_le_bytes(prefix) as usize;

        if len < FRAME_HEADER {
            return Err(RtPlotError::Protocol(format!("frame length {} too short", len)));
        }
        if len > MAX_FRAME_LEN {
            return Err(RtPlotError::Protocol(format!(
                "frame length {} exceeds limit of {}",
                len, MAX_FRAME_LEN
            )));
        }
        let total = LEN_PREFIX + len;
        if buf.len() < total {
            return Ok(None);
        }

        let version = buf[LEN_PREFIX];
        if version != FRAME_VERSION {
            return Err(RtPlotError::Protocol(format!(
                "unsupported frame version {}",
                version
            )));
        }
        let opcode = Opcode::try_from(buf[LEN_PREFIX + 1])?;
        let payload = &buf[LEN_PREFIX + FRAME_HEADER..total];
        let message = self.decode_payload(opcode, payload)?;
        Ok(Some((message, total)))
    }

    fn decode_payload(&self, opcode: Opcode, payload: &[u8]) -> Result<Message> {
        let message = match opcode {
            Opcode::Xy => {
                let (x, y): (f64, f64) = parse_json(opcode, payload)?;
                Message::Xy { x, y }
            }
            Opcode::XyList => Message::XyList(parse_json(opcode, payload)?),
            Opcode::XListYList => {
                let (xs, ys): (Vec<f64>, Vec<f64>) = parse_json(opcode, payload)?;
                check_columns(&xs, &ys)?;
                Message::XListYList { xs, ys }
            }
            Opcode::Exit => {
                if !payload.is_empty() {
                    return Err(RtPlotError::Protocol(format!(
                        "EXIT frame carries {} unexpected bytes",
                        payload.len()
                    )));
                }
                Message::Exit
            }
            Opcode::NumericXyList => {
                let values = self.read_floats(payload)?;
                if values.len() % 2 != 0 {
                    return Err(RtPlotError::Protocol(format!(
                        "NUMERIC_XY_LIST carries an odd value count {}",
                        values.len()
                    )));
                }
                Message::NumericXyList(values.chunks_exact(2).map(|p| (p[0], p[1])).collect())
            }
            Opcode::NumericXListYList => {
                if payload.len() < LEN_PREFIX {
                    return Err(RtPlotError::Protocol(
                        "NUMERIC_X_LIST_Y_LIST missing sample count".to_string(),
                    ));
                }
                let mut count = [0u8; LEN_PREFIX];
                count.copy_from_slice(&payload[..LEN_PREFIX]);
                let n = u32::from_le_bytes(count) as usize;

                let body = &payload[LEN_PREFIX..];
                if body.len() != n * 2 * self.dtype.width() {
                    return Err(RtPlotError::Protocol(format!(
                        "NUMERIC_X_LIST_Y_LIST declares {} samples but carries {} bytes",
                        n,
                        body.len()
                    )));
                }
                let (xb, yb) = body.split_at(n * self.dtype.width());
                Message::NumericXListYList {
                    xs: self.read_floats(xb)?,
                    ys: self.read_floats(yb)?,
                }
            }
            Opcode::Rpc => Message::Rpc(parse_json::<RpcEnvelope>(opcode, payload)?),
        };
        Ok(message)
    }

    fn read_floats(&self, bytes: &[u8]) -> Result<Vec<f64>> {
        let width = self.dtype.width();
        if bytes.len() % width != 0 {
            return Err(RtPlotError::Protocol(format!(
                "{} bytes is not a whole number of {} values",
                bytes.len(),
                self.dtype
            )));
        }
        let values = match self.dtype {
            Dtype::Float32 => bytes
                .chunks_exact(4)
                .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
            Dtype::Float64 => bytes
                .chunks_exact(8)
                .map(|c| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(c);
                    f64::from_le_bytes(raw)
                })
                .collect(),
        };
        Ok(values)
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(opcode: Opcode, payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| RtPlotError::Protocol(format!("malformed {} payload: {}", opcode, e)))
}

fn check_columns(xs: &[f64], ys: &[f64]) -> Result<()> {
    if xs.len() == ys.len() {
        Ok(())
    } else {
        Err(RtPlotError::Protocol(format!(
            "x/y length mismatch: {} != {}",
            xs.len(),
            ys.len()
        )))
    }
}

/// Accumulates received bytes and yields whole messages in receipt order
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: FrameCodec,
    buf: Vec<u8>,
    start: usize,
}

impl FrameDecoder {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buf: Vec::new(),
            start: 0,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        if self.start > 0 && self.start * 2 >= self.buf.len() {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete message, if the buffered bytes hold one
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        match self.codec.decode(&self.buf[self.start..])? {
            Some((message, used)) => {
                self.start += used;
                if self.start == self.buf.len() {
                    self.buf.clear();
                    self.start = 0;
                }
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Bytes received but not yet consumed as a message
    pub fn pending_bytes(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Drop any partially received frame
    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
    }

    pub fn codec(&self) -> FrameCodec {
        self.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Kwargs, RpcRequest};
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::Xy { x: 1.5, y: -2.0 },
            Message::XyList(vec![(0.0, 1.0), (2.0, 3.0)]),
            Message::XListYList {
                xs: vec![1.0, 2.0, 3.0],
                ys: vec![4.0, 5.0, 6.0],
            },
            Message::NumericXyList(vec![(0.25, 0.5), (1.0e9, -7.125)]),
            Message::NumericXListYList {
                xs: vec![1.0, 2.0],
                ys: vec![3.0, 4.0],
            },
            Message::Rpc(RpcEnvelope::Request(RpcRequest::new(
                1,
                "echo_len",
                vec![json!("hello")],
                Kwargs::new(),
            ))),
            Message::Exit,
        ]
    }

    #[test]
    fn test_every_opcode_decodes_to_itself() {
        let codec = FrameCodec::new(Dtype::Float64);
        for message in sample_messages() {
            let frame = codec.encode(&message).unwrap();
            let (decoded, used) = codec.decode(&frame).unwrap().unwrap();
            assert_eq!(used, frame.len());
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_frame_layout() {
        let codec = FrameCodec::new(Dtype::Float64);
        let frame = codec
            .encode(&Message::NumericXyList(vec![(1.0, 2.0)]))
            .unwrap();
        assert_eq!(&frame[..4], &18u32.to_le_bytes());
        assert_eq!(frame[4], FRAME_VERSION);
        assert_eq!(frame[5], 4);
        assert_eq!(&frame[6..14], &1.0f64.to_le_bytes());
        assert_eq!(&frame[14..22], &2.0f64.to_le_bytes());

        let exit = codec.encode(&Message::Exit).unwrap();
        assert_eq!(exit, vec![2, 0, 0, 0, FRAME_VERSION, 3]);
    }

    #[test]
    fn test_float32_width() {
        let codec = FrameCodec::new(Dtype::Float32);
        let message = Message::NumericXListYList {
            xs: vec![0.5, 1.5],
            ys: vec![2.5, 3.5],
        };
        let frame = codec.encode(&message).unwrap();
        // prefix + header + count + 4 floats
        assert_eq!(frame.len(), 4 + 2 + 4 + 16);
        assert_eq!(codec.decode(&frame).unwrap().unwrap().0, message);
    }

    #[test]
    fn test_incomplete_frame_needs_more() {
        let codec = FrameCodec::default();
        let frame = codec.encode(&Message::Xy { x: 1.0, y: 2.0 }).unwrap();
        for cut in 0..frame.len() {
            assert!(codec.decode(&frame[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn test_malformed_frames() {
        let codec = FrameCodec::default();

        let unknown = [2, 0, 0, 0, FRAME_VERSION, 42];
        assert!(matches!(codec.decode(&unknown), Err(RtPlotError::Protocol(_))));

        let bad_version = [2, 0, 0, 0, 9, 3];
        assert!(matches!(codec.decode(&bad_version), Err(RtPlotError::Protocol(_))));

        let short = [1, 0, 0, 0, FRAME_VERSION];
        assert!(codec.decode(&short).is_err());

        let huge = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        assert!(codec.decode(&huge).is_err());

        let mut ragged = vec![5, 0, 0, 0, FRAME_VERSION, 4];
        ragged.extend_from_slice(&[0, 0, 0]);
        assert!(codec.decode(&ragged).is_err());

        let mut bad_json = vec![5, 0, 0, 0, FRAME_VERSION, 0];
        bad_json.extend_from_slice(b"[1,");
        assert!(codec.decode(&bad_json).is_err());
    }

    #[test]
    fn test_column_length_mismatch() {
        let codec = FrameCodec::default();
        let message = Message::XListYList {
            xs: vec![1.0],
            ys: vec![],
        };
        let mut out = vec![0xAA];
        assert!(codec.encode_into(&message, &mut out).is_err());
        assert_eq!(out, vec![0xAA]);

        let numeric = Message::NumericXListYList {
            xs: vec![1.0, 2.0],
            ys: vec![1.0],
        };
        assert!(codec.encode(&numeric).is_err());
    }

    #[test]
    fn test_numeric_count_mismatch() {
        let codec = FrameCodec::default();
        let mut frame = codec
            .encode(&Message::NumericXListYList {
                xs: vec![1.0],
                ys: vec![2.0],
            })
            .unwrap();
        // claim two samples while carrying one
        frame[6] = 2;
        assert!(matches!(codec.decode(&frame), Err(RtPlotError::Protocol(_))));
    }

    #[test]
    fn test_decoder_preserves_order_and_clears() {
        let codec = FrameCodec::default();
        let mut stream = Vec::new();
        for message in sample_messages() {
            codec.encode_into(&message, &mut stream).unwrap();
        }

        let mut decoder = FrameDecoder::new(codec);
        decoder.feed(&stream[..stream.len() - 1]);
        let mut got = Vec::new();
        while let Some(m) = decoder.next_message().unwrap() {
            got.push(m);
        }
        assert_eq!(got.len(), sample_messages().len() - 1);
        assert_eq!(decoder.pending_bytes(), 5);

        decoder.clear();
        assert_eq!(decoder.pending_bytes(), 0);
        decoder.feed(&codec.encode(&Message::Exit).unwrap());
        assert_eq!(decoder.next_message().unwrap(), Some(Message::Exit));
    }

    proptest! {
        #[test]
        fn prop_decoder_independent_of_chunking(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 1..40),
            chunk in 1usize..17,
        ) {
            let codec = FrameCodec::new(Dtype::Float64);
            let messages: Vec<Message> = values
                .chunks(3)
                .map(|c| Message::NumericXyList(c.iter().map(|&v| (v, -v)).collect()))
                .collect();
            let mut stream = Vec::new();
            for m in &messages {
                codec.encode_into(m, &mut stream).unwrap();
            }

            let mut decoder = FrameDecoder::new(codec);
            let mut got = Vec::new();
            for piece in stream.chunks(chunk) {
                decoder.feed(piece);
                while let Some(m) = decoder.next_message().unwrap() {
                    got.push(m);
                }
            }
            prop_assert_eq!(got, messages);
            prop_assert_eq!(decoder.pending_bytes(), 0);
        }
    }
}
