//! Wire protocol
//!
//! A connection moves through [`ProtocolState`]:
//!
//! ```text
//! Startup -> Handshake -> Pump -> Closed
//! ```
//!
//! The producer opens with a [`HandshakeRecord`] and the consumer acknowledges
//! it. After that each [`Message`] travels as one length-prefixed frame (see
//! [`codec`]), processed strictly in receipt order.

pub mod codec;
mod handshake;
mod message;

pub use codec::{Dtype, FrameCodec, FrameDecoder, FRAME_VERSION, MAX_FRAME_LEN};
pub use handshake::{
    Handshake, HandshakeRecord, Negotiated, ProtocolState, ACK_TOKEN, HANDSHAKE_MAGIC,
    HANDSHAKE_VERSION, MAX_CAPACITY,
};
pub use message::{Message, Opcode};
