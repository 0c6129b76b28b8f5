//! Transport abstraction over an open, authenticated byte stream

use crate::{Error, Result};
use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

// Process-wide transport id source, so replaced handles are distinguishable
static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Any bidirectional async byte stream a transport can own
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// Open, bidirectional byte stream produced by a negotiator
pub struct Transport {
    id: u64,
    peer: String,
    mechanism: String,
    stream: Option<Box<dyn IoStream>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("mechanism", &self.mechanism)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Transport {
    /// Wrap an already-connected TCP stream
    pub fn from_tcp(stream: TcpStream, peer: impl Into<String>, mechanism: impl Into<String>) -> Self {
        Self::from_stream(stream, peer, mechanism)
    }

    /// Wrap any async stream (in-memory pipes, custom sockets)
    pub fn from_stream<S: IoStream + 'static>(
        stream: S,
        peer: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        Self {
            id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
            peer: peer.into(),
            mechanism: mechanism.into(),
            stream: Some(Box::new(stream)),
        }
    }

    /// Unique id of this transport within the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote peer, as `host:port`
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Authentication mechanism that produced this transport
    pub fn mechanism(&self) -> &str {
        &self.mechanism
    }

    /// Whether the stream is still held
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stream_mut(&mut self) -> Result<&mut Box<dyn IoStream>> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Write all bytes to the transport
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream_mut()?.write_all(buf).await?;
        Ok(())
    }

    /// Flush the transport
    pub async fn flush(&mut self) -> Result<()> {
        self.stream_mut()?.flush().await?;
        Ok(())
    }

    /// Read bytes into buffer
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = self.stream_mut()?.read_buf(buf).await?;
        Ok(n)
    }

    /// Close the transport
    ///
    /// Idempotent: closing an already-closed transport is a no-op. The stream
    /// is released even when the shutdown handshake fails.
    pub async fn close(&mut self) -> Result<()> {
        match self.stream.take() {
            Some(mut stream) => {
                stream.shutdown().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Close, logging instead of returning any shutdown failure
    ///
    /// Used on error paths where the primary error must be preserved.
    pub async fn close_quietly(&mut self) {
        if let Err(e) = self.close().await {
            tracing::debug!(transport = self.id, error = %e, "ignoring error while closing transport");
        }
    }
}

type StreamReader = ReadHalf<Box<dyn IoStream>>;
type StreamWriter = WriteHalf<Box<dyn IoStream>>;

/// Transport shared between a connection handle and its protocol view
///
/// The stream is split so a reader parked on the read half never holds up a
/// writer or [`SharedTransport::close`]. Closing fires a token that every
/// pending read and write races against, so I/O in flight fails with
/// [`Error::ConnectionClosed`] instead of waiting on the peer.
#[derive(Clone)]
pub struct SharedTransport {
    id: u64,
    peer: String,
    mechanism: String,
    reader: Arc<tokio::sync::Mutex<Option<StreamReader>>>,
    writer: Arc<tokio::sync::Mutex<Option<StreamWriter>>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

impl SharedTransport {
    /// Take ownership of a transport
    pub fn new(mut transport: Transport) -> Self {
        let closed = CancellationToken::new();
        let (reader, writer) = match transport.stream.take() {
            Some(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                (Some(reader), Some(writer))
            }
            None => {
                closed.cancel();
                (None, None)
            }
        };
        Self {
            id: transport.id,
            peer: transport.peer,
            mechanism: transport.mechanism,
            reader: Arc::new(tokio::sync::Mutex::new(reader)),
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            closed,
        }
    }

    /// Id of the wrapped transport
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote peer
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Authentication mechanism that produced the wrapped transport
    pub fn mechanism(&self) -> &str {
        &self.mechanism
    }

    /// Whether both handles wrap the same transport
    pub fn ptr_eq(&self, other: &SharedTransport) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }

    /// Whether the transport has not been closed yet
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Read bytes into buffer
    ///
    /// Returns [`Error::ConnectionClosed`] as soon as the transport is closed,
    /// even while waiting for the peer.
    pub async fn read_buf(&self, buf: &mut BytesMut) -> Result<usize> {
        let mut reader = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::ConnectionClosed),
            guard = self.reader.lock() => guard,
        };
        let reader = reader.as_mut().ok_or(Error::ConnectionClosed)?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ConnectionClosed),
            read = reader.read_buf(buf) => Ok(read?),
        }
    }

    /// Write all bytes and flush
    pub async fn write_all(&self, buf: &[u8]) -> Result<()> {
        let mut writer = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::ConnectionClosed),
            guard = self.writer.lock() => guard,
        };
        let writer = writer.as_mut().ok_or(Error::ConnectionClosed)?;
        let write = async {
            writer.write_all(buf).await?;
            writer.flush().await
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ConnectionClosed),
            written = write => Ok(written?),
        }
    }

    /// Close the wrapped transport
    ///
    /// The transport is marked closed before the first await, so pending I/O
    /// is released even if this future is dropped. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.closed.cancel();
        let reader = self.reader.lock().await.take();
        drop(reader);
        let writer = self.writer.lock().await.take();
        match writer {
            Some(mut writer) => {
                writer.shutdown().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}
