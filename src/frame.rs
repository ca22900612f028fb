use crate::close_code::CloseCode;
use crate::consts::*;
use crate::encoding::encode_length;
use crate::error::ProtocolViolation;
use crate::opcode::Opcode;

/// One wire-level frame, RFC 6455 section 5.2.
///
/// Produced by [`decode`] with the payload already unmasked; consumed once
/// and discarded.
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub reserved_bits_set: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub mask_key: Option<[u8; 4]>,
    pub payload_length: u64,
    pub payload: Vec<u8>,
}

struct Header {
    masked: bool,
    payload_length: u64,
    /// Bytes occupied by the fixed header, the extended length and the
    /// mask key together.
    prefix_length: usize,
}

/// Reads the length tier and mask bit out of a frame prefix. Needs at
/// least the first 2 bytes, and up to 14 for a masked 64-bit length.
fn parse_header(raw: &[u8]) -> Result<Header, ProtocolViolation> {
    if raw.len() < 2 {
        return Err(ProtocolViolation::MalformedLengthField);
    }
    let masked = is_masked(raw[1]);
    let (payload_length, mut prefix_length) = match raw[1] & LENGTH_MASK {
        LENGTH_U16 => {
            if raw.len() < 4 {
                return Err(ProtocolViolation::MalformedLengthField);
            }
            (u16::from_be_bytes([raw[2], raw[3]]) as u64, 4)
        }
        LENGTH_U64 => {
            if raw.len() < 10 {
                return Err(ProtocolViolation::MalformedLengthField);
            }
            // the most significant bit of a 64-bit length must be 0,
            // RFC 6455 section 5.2; rejecting it here also keeps the
            // prefix + payload total below u64::MAX
            if raw[2] & 0x80 != 0 {
                return Err(ProtocolViolation::MalformedLengthField);
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&raw[2..10]);
            (u64::from_be_bytes(bytes), 10)
        }
        value => (value as u64, 2),
    };
    if masked {
        prefix_length += 4;
    }
    Ok(Header {
        masked,
        payload_length,
        prefix_length,
    })
}

/// Parses one complete frame out of `raw` and unmasks its payload.
///
/// Empty input decodes to an empty continuation-shaped frame rather than
/// an error, mirroring what an empty transport delivery means. A reserved
/// opcode or set RSV bits do not error here either; they are reported
/// through the `opcode`/`reserved_bits_set` fields and rejected by
/// [`validate`]. Only a truncated header or payload is an error.
pub fn decode(raw: &[u8]) -> Result<Frame, ProtocolViolation> {
    if raw.is_empty() {
        return Ok(Frame {
            fin: false,
            reserved_bits_set: false,
            opcode: Opcode::Continuation,
            masked: false,
            mask_key: None,
            payload_length: 0,
            payload: Vec::new(),
        });
    }

    let header = parse_header(raw)?;
    let mask_key = if header.masked {
        if raw.len() < header.prefix_length {
            return Err(ProtocolViolation::MalformedLengthField);
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&raw[header.prefix_length - 4..header.prefix_length]);
        Some(key)
    } else {
        None
    };

    let payload_end = header.prefix_length as u64 + header.payload_length;
    if (raw.len() as u64) < payload_end {
        return Err(ProtocolViolation::MalformedLengthField);
    }
    let mut payload = raw[header.prefix_length..payload_end as usize].to_vec();

    if let Some(key) = mask_key {
        // unmasking the message
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Frame {
        fin: is_fin(raw[0]),
        reserved_bits_set: is_rsv_set(raw[0]),
        opcode: Opcode::decode(raw[0]),
        masked: header.masked,
        mask_key,
        payload_length: header.payload_length,
        payload,
    })
}

/// Builds one complete frame around `payload`.
///
/// With `mask` set a fresh random 4-byte key is drawn and the payload is
/// XOR-encoded, as required for client-to-server frames; server-to-client
/// frames go out unmasked.
pub fn encode(payload: &[u8], opcode: Opcode, fin: bool, mask: bool) -> Vec<u8> {
    let first_byte = opcode.encode() | if fin { FIN_MASK } else { 0 };
    let mut length = encode_length(payload.len());
    if mask {
        length[0] |= MASKED_MASK;
        let key: [u8; 4] = rand::random();
        let mut masked_payload = payload.to_vec();
        for (i, byte) in masked_payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
        [&[first_byte][..], &length, &key, &masked_payload].concat()
    } else {
        [&[first_byte][..], &length, payload].concat()
    }
}

/// Total bytes the frame starting at `raw` occupies on the wire: header,
/// extended length, mask key and payload. Needs only the header prefix,
/// so a transport delivery can be classified as a whole frame, a partial
/// frame or several frames back to back before the payload has arrived.
pub fn total_frame_length(raw: &[u8]) -> Result<u64, ProtocolViolation> {
    let header = parse_header(raw)?;
    Ok(header.prefix_length as u64 + header.payload_length)
}

/// Payload length declared in the header, without the frame prefix.
pub fn header_payload_length(raw: &[u8]) -> Result<u64, ProtocolViolation> {
    Ok(parse_header(raw)?.payload_length)
}

/// Rejects whatever a frame prefix already proves invalid, without
/// waiting for the payload: a reserved opcode, set RSV bits, a
/// fragmented control frame, a control frame declaring more than 125
/// bytes, or a 64-bit length with its most significant bit set. A
/// truncated prefix passes; it is re-checked as more bytes arrive. This
/// lets a connection refuse a hostile frame at header time instead of
/// buffering its declared payload first.
pub fn check_prefix(raw: &[u8]) -> Result<(), ProtocolViolation> {
    if raw.is_empty() {
        return Ok(());
    }
    let opcode = Opcode::decode(raw[0]);
    if opcode == Opcode::Invalid {
        return Err(ProtocolViolation::InvalidOpcode(raw[0] & OPCODE_MASK));
    }
    if is_rsv_set(raw[0]) {
        return Err(ProtocolViolation::ReservedBitsSet);
    }
    if opcode.is_control() && !is_fin(raw[0]) {
        return Err(ProtocolViolation::FragmentedControlFrame);
    }
    if raw.len() < 2 {
        return Ok(());
    }
    let length_field = raw[1] & LENGTH_MASK;
    if opcode.is_control() && length_field as u64 > MAX_CONTROL_PAYLOAD {
        // the 126/127 sentinels already declare an extended length, which
        // a control frame may not carry at all
        let length = header_payload_length(raw).unwrap_or(length_field as u64);
        return Err(ProtocolViolation::OversizedControlFrame(length));
    }
    if length_field == LENGTH_U64 && raw.len() >= 3 && raw[2] & 0x80 != 0 {
        return Err(ProtocolViolation::MalformedLengthField);
    }
    Ok(())
}

/// Frame-level sanity check on a complete raw frame header: everything
/// [`check_prefix`] enforces, with a truncated header rejected as well.
pub fn check(raw: &[u8]) -> Result<(), ProtocolViolation> {
    if raw.len() < 2 {
        return Err(ProtocolViolation::MalformedLengthField);
    }
    check_prefix(raw)
}

/// Boolean form of [`check`].
pub fn validate(raw: &[u8]) -> bool {
    check(raw).is_ok()
}

/// Ready-to-send close frame; the payload is the close code as a 2-byte
/// big-endian integer.
pub fn close_message(code: CloseCode) -> Vec<u8> {
    debug_assert!(code.is_sendable());
    encode(&code.to_u16().to_be_bytes(), Opcode::Close, true, false)
}

/// Ready-to-send ping frame.
pub fn ping_message(payload: &[u8]) -> Vec<u8> {
    encode(payload, Opcode::Ping, true, false)
}

/// Ready-to-send pong frame echoing the ping payload.
pub fn pong_message(payload: &[u8]) -> Vec<u8> {
    encode(payload, Opcode::Pong, true, false)
}
