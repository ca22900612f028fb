use super::consts::OPCODE_MASK;

/// 4-bit frame opcode, RFC 6455 section 5.2.
///
/// The reserved values 0x3-0x7 and 0xB-0xF all collapse into `Invalid`;
/// a frame carrying one of them fails validation and closes the
/// connection with a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Invalid,
}

impl Opcode {
    // takes the whole first header byte, not a pre-shifted nibble
    pub fn decode(byte: u8) -> Self {
        use Opcode::*;
        match byte & OPCODE_MASK {
            0x0 => Continuation,
            0x1 => Text,
            0x2 => Binary,
            0x8 => Close,
            0x9 => Ping,
            0xA => Pong,
            _ => Invalid,
        }
    }

    pub fn encode(&self) -> u8 {
        use Opcode::*;
        match self {
            Continuation => 0x0,
            Text => 0x1,
            Binary => 0x2,
            Close => 0x8,
            Ping => 0x9,
            Pong => 0xA,
            Invalid => panic!("Invalid opcode cannot be encoded"),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Opcode::Continuation | Opcode::Text | Opcode::Binary)
    }
}
