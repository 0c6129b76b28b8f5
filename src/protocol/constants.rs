//! SASL negotiation and framing constants

/// Negotiation frame status bytes
pub mod status {
    /// Client opens negotiation; payload carries the mechanism name
    pub const START: u8 = 0x01;

    /// Exchange continues
    pub const OK: u8 = 0x02;

    /// Peer rejected the exchange (bad credentials or mechanism)
    pub const BAD: u8 = 0x03;

    /// Peer failed internally
    pub const ERROR: u8 = 0x04;

    /// Exchange finished successfully
    pub const COMPLETE: u8 = 0x05;
}

/// Negotiation frame header: status byte + 4-byte big-endian length
pub const SASL_HEADER_LEN: usize = 5;

/// Data frame header: 4-byte big-endian length
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload accepted in either framing (16 MB)
///
/// Length fields above this are rejected before allocation.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;
