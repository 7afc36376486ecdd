//! Opcodes and the messages they tag

use crate::error::RtPlotError;
use crate::rpc::RpcEnvelope;
use std::fmt;

/// Integer tag identifying a message's payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Xy = 0,
    XyList = 1,
    XListYList = 2,
    Exit = 3,
    NumericXyList = 4,
    NumericXListYList = 5,
    Rpc = 6,
}

impl Opcode {
    pub const ALL: [Opcode; 7] = [
        Opcode::Xy,
        Opcode::XyList,
        Opcode::XListYList,
        Opcode::Exit,
        Opcode::NumericXyList,
        Opcode::NumericXListYList,
        Opcode::Rpc,
    ];

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = RtPlotError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| RtPlotError::Protocol(format!("unknown opcode {}", value)))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Xy => "XY",
            Opcode::XyList => "XY_LIST",
            Opcode::XListYList => "X_LIST_Y_LIST",
            Opcode::Exit => "EXIT",
            Opcode::NumericXyList => "NUMERIC_XY_LIST",
            Opcode::NumericXListYList => "NUMERIC_X_LIST_Y_LIST",
            Opcode::Rpc => "RPC",
        };
        f.write_str(name)
    }
}

/// One unit of the data stream.
///
/// The structured variants travel as JSON; the numeric variants travel as raw
/// little-endian floats. Both decode to the same shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Xy { x: f64, y: f64 },
    XyList(Vec<(f64, f64)>),
    XListYList { xs: Vec<f64>, ys: Vec<f64> },
    Exit,
    NumericXyList(Vec<(f64, f64)>),
    NumericXListYList { xs: Vec<f64>, ys: Vec<f64> },
    Rpc(RpcEnvelope),
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Xy { .. } => Opcode::Xy,
            Message::XyList(_) => Opcode::XyList,
            Message::XListYList { .. } => Opcode::XListYList,
            Message::Exit => Opcode::Exit,
            Message::NumericXyList(_) => Opcode::NumericXyList,
            Message::NumericXListYList { .. } => Opcode::NumericXListYList,
            Message::Rpc(_) => Opcode::Rpc,
        }
    }

    /// Number of (x, y) samples carried
    pub fn sample_count(&self) -> usize {
        match self {
            Message::Xy { .. } => 1,
            Message::XyList(pairs) | Message::NumericXyList(pairs) => pairs.len(),
            Message::XListYList { xs, .. } | Message::NumericXListYList { xs, .. } => xs.len(),
            Message::Exit | Message::Rpc(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(Opcode::Xy.as_u8(), 0);
        assert_eq!(Opcode::XyList.as_u8(), 1);
        assert_eq!(Opcode::XListYList.as_u8(), 2);
        assert_eq!(Opcode::Exit.as_u8(), 3);
        assert_eq!(Opcode::NumericXyList.as_u8(), 4);
        assert_eq!(Opcode::NumericXListYList.as_u8(), 5);
        assert_eq!(Opcode::Rpc.as_u8(), 6);
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op.as_u8()).unwrap(), op);
        }
    }

    #[test]
    fn test_unknown_opcode() {
        let err = Opcode::try_from(7).unwrap_err();
        assert!(matches!(err, RtPlotError::Protocol(_)));
    }

    #[test]
    fn test_sample_count() {
        assert_eq!(Message::Xy { x: 0.0, y: 0.0 }.sample_count(), 1);
        assert_eq!(
            Message::NumericXListYList {
                xs: vec![1.0, 2.0],
                ys: vec![3.0, 4.0]
            }
            .sample_count(),
            2
        );
        assert_eq!(Message::Exit.sample_count(), 0);
        assert_eq!(Message::Exit.opcode().to_string(), "EXIT");
    }
}
