//! Frame encoding

use super::constants::MAX_FRAME_LENGTH;
use super::message::SaslFrame;
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a negotiation frame into bytes
pub fn encode_sasl_frame(frame: &SaslFrame) -> io::Result<BytesMut> {
    check_length(frame.payload.len())?;

    let mut buf = BytesMut::with_capacity(super::constants::SASL_HEADER_LEN + frame.payload.len());
    buf.put_u8(frame.status.as_byte());
    buf.put_u32(frame.payload.len() as u32);
    buf.put_slice(&frame.payload);
    Ok(buf)
}

/// Encode a length-prefixed data frame
pub fn encode_data_frame(payload: &[u8]) -> io::Result<BytesMut> {
    check_length(payload.len())?;

    let mut buf = BytesMut::with_capacity(super::constants::FRAME_HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf)
}

fn check_length(len: usize) -> io::Result<()> {
    if len > MAX_FRAME_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "frame length {} exceeds maximum allowed {}",
                len, MAX_FRAME_LENGTH
            ),
        ));
    }
    Ok(())
}
