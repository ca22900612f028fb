//! Accumulation buffers for the two ways a logical message arrives in
//! pieces: a single frame split across transport deliveries, and a
//! fragmented message split across continuation frames.

use crate::consts::MAX_HEADER_PREFIX;
use crate::frame;
use crate::opcode::Opcode;

/// Payload kind of a fragmented series, fixed by its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

impl MessageKind {
    pub fn from_opcode(opcode: Opcode) -> Option<Self> {
        match opcode {
            Opcode::Text => Some(MessageKind::Text),
            Opcode::Binary => Some(MessageKind::Binary),
            _ => None,
        }
    }
}

/// Byte-level accumulation: one frame whose bytes are still arriving.
///
/// Completion is decided strictly by the total frame length decoded from
/// the header, never by a fixed offset. The header itself may be split
/// across deliveries, in which case the declared length is recomputed as
/// bytes arrive. If the partial frame interrupted a fragmented series,
/// the series is parked in `suspended` and restored once the frame
/// completes.
#[derive(Debug)]
pub struct FrameAssembly {
    buf: Vec<u8>,
    total_len: Option<u64>,
    suspended: Option<MessageAssembly>,
}

impl FrameAssembly {
    pub fn new(first_chunk: Vec<u8>, suspended: Option<MessageAssembly>) -> Self {
        let total_len = frame::total_frame_length(&first_chunk).ok();
        FrameAssembly {
            buf: first_chunk,
            total_len,
            suspended,
        }
    }

    /// Appends one transport delivery. Returns the full frame bytes once
    /// the declared length is reached; any surplus past the frame end
    /// stays in the returned vector for the caller's decode loop to slice.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        if self.total_len.is_none() {
            // not enough header bytes had arrived to declare a length yet
            self.total_len = frame::total_frame_length(&self.buf).ok();
        }
        match self.total_len {
            Some(total) if (self.buf.len() as u64) >= total => {
                Some(std::mem::take(&mut self.buf))
            }
            _ => None,
        }
    }

    /// The buffered frame prefix, for header-level checks while the
    /// rest of the frame is still in flight.
    pub fn prefix(&self) -> &[u8] {
        let end = self.buf.len().min(MAX_HEADER_PREFIX);
        &self.buf[..end]
    }

    pub fn into_suspended(self) -> Option<MessageAssembly> {
        self.suspended
    }
}

/// Message-level accumulation: payloads of a continuation series, keyed
/// by the opcode of the first frame.
#[derive(Debug)]
pub struct MessageAssembly {
    kind: MessageKind,
    payload: Vec<u8>,
}

impl MessageAssembly {
    pub fn new(kind: MessageKind, first_payload: Vec<u8>) -> Self {
        MessageAssembly {
            kind,
            payload: first_payload,
        }
    }

    pub fn push(&mut self, frame_payload: &[u8]) {
        self.payload.extend_from_slice(frame_payload);
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Per-connection accumulation state; the modes are mutually exclusive.
#[derive(Debug)]
pub enum AssemblyState {
    Idle,
    /// A frame is split across transport deliveries.
    Frame(FrameAssembly),
    /// A message is split across continuation frames.
    Message(MessageAssembly),
}

impl AssemblyState {
    pub fn is_idle(&self) -> bool {
        matches!(self, AssemblyState::Idle)
    }
}
