//! Wire framing
//!
//! This module handles:
//! * Negotiation frames exchanged while authenticating (status + length + payload)
//! * Length-prefixed data frames for the protocol view handed to RPC callers

mod binary;
pub mod constants;
pub mod decode;
pub mod encode;
mod message;

pub use binary::BinaryProtocol;
pub use decode::{decode_data_frame, decode_sasl_frame};
pub use encode::{encode_data_frame, encode_sasl_frame};
pub use message::{SaslFrame, SaslStatus};
