//! Frame decoding

use super::constants::{FRAME_HEADER_LEN, MAX_FRAME_LENGTH, SASL_HEADER_LEN};
use super::message::{SaslFrame, SaslStatus};
use bytes::{Bytes, BytesMut};
use std::io;

/// Decode a negotiation frame from the front of `data`
///
/// Does not consume anything; the caller advances the buffer by the returned
/// byte count.
///
/// # Returns
/// `Ok((frame, consumed))` - Frame and number of bytes consumed
/// `Err(e)` with kind `UnexpectedEof` - more bytes are needed
/// `Err(e)` with any other kind - the stream is corrupt
pub fn decode_sasl_frame(data: &BytesMut) -> io::Result<(SaslFrame, usize)> {
    if data.len() < SASL_HEADER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete frame header",
        ));
    }

    let status = SaslStatus::from_byte(data[0]).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown negotiation status: 0x{:02X}", data[0]),
        )
    })?;
    let len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
    check_length(len)?;

    let end = SASL_HEADER_LEN + len;
    if data.len() < end {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete frame body",
        ));
    }

    let payload = Bytes::copy_from_slice(&data[SASL_HEADER_LEN..end]);
    Ok((SaslFrame { status, payload }, end))
}

/// Decode a length-prefixed data frame from the front of `data`
///
/// Same contract as [`decode_sasl_frame`].
pub fn decode_data_frame(data: &BytesMut) -> io::Result<(Bytes, usize)> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete frame header",
        ));
    }

    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    check_length(len)?;

    let end = FRAME_HEADER_LEN + len;
    if data.len() < end {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete frame body",
        ));
    }

    Ok((Bytes::copy_from_slice(&data[FRAME_HEADER_LEN..end]), end))
}

fn check_length(len: usize) -> io::Result<()> {
    if len > MAX_FRAME_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "frame length {} exceeds maximum allowed {}",
                len, MAX_FRAME_LENGTH
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ok_frame() {
        let data = BytesMut::from(&[0x02, 0, 0, 0, 3, b'a', b'b', b'c'][..]);
        let (frame, consumed) = decode_sasl_frame(&data).unwrap();
        assert_eq!(frame.status, SaslStatus::Ok);
        assert_eq!(&frame.payload[..], b"abc");
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let data = BytesMut::from(&[0x05, 0, 0, 0, 0, 0x02, 0][..]);
        let (frame, consumed) = decode_sasl_frame(&data).unwrap();
        assert_eq!(frame.status, SaslStatus::Complete);
        assert!(frame.payload.is_empty());
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_decode_incomplete_header() {
        let data = BytesMut::from(&[0x02, 0, 0][..]);
        let err = decode_sasl_frame(&data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_decode_incomplete_body() {
        let data = BytesMut::from(&[0x02, 0, 0, 0, 4, b'a'][..]);
        let err = decode_sasl_frame(&data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_decode_unknown_status() {
        let data = BytesMut::from(&[0x09, 0, 0, 0, 0][..]);
        let err = decode_sasl_frame(&data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let len = ((MAX_FRAME_LENGTH + 1) as u32).to_be_bytes();
        let data = BytesMut::from(&[0x02, len[0], len[1], len[2], len[3]][..]);
        let err = decode_sasl_frame(&data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds maximum"));

        let data = BytesMut::from(&len[..]);
        let err = decode_data_frame(&data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_data_frame() {
        let data = BytesMut::from(&[0, 0, 0, 2, b'h', b'i', 0][..]);
        let (payload, consumed) = decode_data_frame(&data).unwrap();
        assert_eq!(&payload[..], b"hi");
        assert_eq!(consumed, 6);
    }
}
