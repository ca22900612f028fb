pub const FIN_MASK: u8 = 0b1000_0000;
pub const RSV_MASK: u8 = 0b0111_0000;
pub const OPCODE_MASK: u8 = 0b0000_1111;
pub const MASKED_MASK: u8 = 0b1000_0000;
pub const LENGTH_MASK: u8 = 0b0111_1111;

/// 7-bit length sentinel for a 16-bit extended length.
pub const LENGTH_U16: u8 = 126;
/// 7-bit length sentinel for a 64-bit extended length.
pub const LENGTH_U64: u8 = 127;

/// Largest payload a control frame may carry, RFC 6455 section 5.5.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Longest possible frame prefix: 2 header bytes, an 8-byte extended
/// length and a 4-byte mask key.
pub const MAX_HEADER_PREFIX: usize = 14;

/// Largest close code that may go on the wire, RFC 6455 section 7.4.
pub const MAX_CLOSE_CODE: u16 = 4999;

pub const fn is_fin(byte: u8) -> bool {
    (byte & FIN_MASK) == FIN_MASK
}
pub const fn is_rsv_set(byte: u8) -> bool {
    (byte & RSV_MASK) != 0
}
pub const fn is_masked(byte: u8) -> bool {
    (byte & MASKED_MASK) == MASKED_MASK
}
