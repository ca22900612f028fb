use crate::consts::MAX_CLOSE_CODE;

/// Close status codes, RFC 6455 section 7.4.1.
///
/// Only the codes this crate emits or inspects get a variant of their own;
/// anything else in the valid 0-4999 wire range passes through as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    NormalClosure,
    GoingAway,
    ProtocolError,
    UnsupportedData,
    InvalidFramePayload,
    PolicyViolation,
    MessageTooBig,
    InternalError,
    Other(u16),
}

impl CloseCode {
    pub fn from_u16(code: u16) -> Self {
        use CloseCode::*;
        match code {
            1000 => NormalClosure,
            1001 => GoingAway,
            1002 => ProtocolError,
            1003 => UnsupportedData,
            1007 => InvalidFramePayload,
            1008 => PolicyViolation,
            1009 => MessageTooBig,
            1011 => InternalError,
            other => Other(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        use CloseCode::*;
        match self {
            NormalClosure => 1000,
            GoingAway => 1001,
            ProtocolError => 1002,
            UnsupportedData => 1003,
            InvalidFramePayload => 1007,
            PolicyViolation => 1008,
            MessageTooBig => 1009,
            InternalError => 1011,
            Other(code) => code,
        }
    }

    /// Whether the code may be written to the wire at all.
    pub fn is_sendable(self) -> bool {
        self.to_u16() <= MAX_CLOSE_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_codes_round_trip() {
        for &code in &[1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1011] {
            assert_eq!(CloseCode::from_u16(code).to_u16(), code);
        }
    }

    #[test]
    fn unknown_codes_pass_through() {
        assert_eq!(CloseCode::from_u16(4123), CloseCode::Other(4123));
        assert_eq!(CloseCode::Other(4123).to_u16(), 4123);
    }

    #[test]
    fn sendable_range() {
        assert!(CloseCode::NormalClosure.is_sendable());
        assert!(CloseCode::Other(4999).is_sendable());
        assert!(!CloseCode::Other(5000).is_sendable());
    }
}
