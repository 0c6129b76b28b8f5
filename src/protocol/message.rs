//! Negotiation message types

use super::constants::status;
use bytes::Bytes;

/// Status of a negotiation frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslStatus {
    /// Negotiation start (mechanism name follows)
    Start,
    /// Exchange continues
    Ok,
    /// Peer rejected the exchange
    Bad,
    /// Peer failed internally
    Error,
    /// Exchange finished
    Complete,
}

impl SaslStatus {
    /// Wire byte for this status
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Start => status::START,
            Self::Ok => status::OK,
            Self::Bad => status::BAD,
            Self::Error => status::ERROR,
            Self::Complete => status::COMPLETE,
        }
    }

    /// Parse a wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            status::START => Some(Self::Start),
            status::OK => Some(Self::Ok),
            status::BAD => Some(Self::Bad),
            status::ERROR => Some(Self::Error),
            status::COMPLETE => Some(Self::Complete),
            _ => None,
        }
    }

    /// Whether the frame ends the exchange with a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Bad | Self::Error)
    }
}

/// One negotiation frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslFrame {
    /// Frame status
    pub status: SaslStatus,
    /// Mechanism-specific payload
    pub payload: Bytes,
}

impl SaslFrame {
    /// Build a frame
    pub fn new(status: SaslStatus, payload: impl Into<Bytes>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }

    /// Payload as UTF-8 text
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
