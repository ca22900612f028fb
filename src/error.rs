use std::error::Error as StdError;
use std::fmt;

use crate::close_code::CloseCode;

/// Everything a misbehaving peer can get wrong at the framing layer.
///
/// None of these propagate out of the connection as a crash: the state
/// machine converts them into a close frame with the matching close code
/// and tears the connection down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The 4-bit opcode is one of the reserved values.
    InvalidOpcode(u8),
    /// One of RSV1-3 is set and no extension was negotiated.
    ReservedBitsSet,
    /// Close, Ping or Pong with a payload longer than 125 bytes.
    OversizedControlFrame(u64),
    /// Close, Ping or Pong with the FIN bit clear.
    FragmentedControlFrame,
    /// The extended length field or mask key is truncated.
    MalformedLengthField,
    /// A pong arrived while none was outstanding, under `PongPolicy::Close`.
    UnexpectedPong,
    /// A continuation frame arrived outside a fragmented series.
    UnexpectedContinuation,
    /// A new Text/Binary frame arrived in the middle of a fragmented
    /// series, RFC 6455 section 5.4.
    InterleavedDataFrame,
    /// A completed text message is not valid UTF-8.
    InvalidUtf8Payload,
}

impl ProtocolViolation {
    /// The close code sent to the peer for this violation.
    pub fn close_code(&self) -> CloseCode {
        match self {
            ProtocolViolation::InvalidUtf8Payload => CloseCode::InvalidFramePayload,
            _ => CloseCode::ProtocolError,
        }
    }
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolViolation::InvalidOpcode(value) => {
                write!(f, "invalid opcode {:#X}", value)
            }
            ProtocolViolation::ReservedBitsSet => {
                write!(f, "reserved bits set without an extension")
            }
            ProtocolViolation::OversizedControlFrame(len) => {
                write!(f, "control frame payload of {} bytes exceeds 125", len)
            }
            ProtocolViolation::FragmentedControlFrame => {
                write!(f, "control frame without FIN")
            }
            ProtocolViolation::MalformedLengthField => {
                write!(f, "truncated length field or mask key")
            }
            ProtocolViolation::UnexpectedPong => {
                write!(f, "pong received while none was expected")
            }
            ProtocolViolation::UnexpectedContinuation => {
                write!(f, "continuation frame outside a fragmented message")
            }
            ProtocolViolation::InterleavedDataFrame => {
                write!(f, "data frame interleaved into a fragmented message")
            }
            ProtocolViolation::InvalidUtf8Payload => {
                write!(f, "text message payload is not valid UTF-8")
            }
        }
    }
}

impl StdError for ProtocolViolation {}
