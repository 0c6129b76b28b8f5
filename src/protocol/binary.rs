//! Framed protocol view over a shared transport

use super::decode::decode_data_frame;
use super::encode::encode_data_frame;
use crate::connection::SharedTransport;
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::sync::Arc;

/// Length-prefixed frame reader/writer bound to one transport
///
/// Cheap to clone; clones share the transport and the read buffer. Payload
/// encoding is left to the RPC layer above.
#[derive(Clone)]
pub struct BinaryProtocol {
    transport: SharedTransport,
    read_buf: Arc<tokio::sync::Mutex<BytesMut>>,
}

impl std::fmt::Debug for BinaryProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryProtocol")
            .field("transport", &self.transport)
            .finish()
    }
}

impl BinaryProtocol {
    /// Derive a protocol view from a transport
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            read_buf: Arc::new(tokio::sync::Mutex::new(BytesMut::with_capacity(8192))),
        }
    }

    /// Transport this protocol writes to
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// Send one frame
    pub async fn write_frame(&self, payload: &[u8]) -> Result<()> {
        let buf = encode_data_frame(payload)?;
        self.transport.write_all(&buf).await
    }

    /// Receive one frame
    pub async fn read_frame(&self) -> Result<Bytes> {
        let mut read_buf = self.read_buf.lock().await;
        loop {
            match decode_data_frame(&read_buf) {
                Ok((payload, consumed)) => {
                    read_buf.advance(consumed);
                    return Ok(payload);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            // Need more data
            let n = self.transport.read_buf(&mut read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Transport;

    fn protocol_over(mock: tokio_test::io::Mock) -> BinaryProtocol {
        let transport = Transport::from_stream(mock, "peer:1", "plain");
        BinaryProtocol::new(SharedTransport::new(transport))
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 3, b'a', b'b', b'c'])
            .build();
        let protocol = protocol_over(mock);
        protocol.write_frame(b"abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 0])
            .read(&[0, 2, b'h'])
            .read(&[b'i', 0, 0, 0, 1, b'!'])
            .build();
        let protocol = protocol_over(mock);

        assert_eq!(&protocol.read_frame().await.unwrap()[..], b"hi");
        assert_eq!(&protocol.read_frame().await.unwrap()[..], b"!");
    }

    #[tokio::test]
    async fn test_read_frame_eof() {
        let mock = tokio_test::io::Builder::new().read(&[0, 0, 0, 9]).build();
        let protocol = protocol_over(mock);
        let result = protocol.read_frame().await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_after_close() {
        let (a, _b) = tokio::io::duplex(64);
        let shared = SharedTransport::new(Transport::from_stream(a, "peer:1", "plain"));
        let protocol = BinaryProtocol::new(shared.clone());
        shared.close().await.unwrap();

        let result = protocol.read_frame().await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
