//! Unopened socket descriptor

use super::endpoint::Endpoint;
use crate::Result;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// Socket parameters for one (re)connect cycle
///
/// A `Socket` is only a description of where to connect. Each call to
/// [`Socket::open`] creates a fresh TCP stream, so a negotiation attempt that
/// fails never leaves a half-used stream behind for the next attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socket {
    host: String,
    port: u16,
    timeout: Option<Duration>,
}

impl Socket {
    /// Create a socket bound to host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: None,
        }
    }

    /// Create a socket for a resolved endpoint, applying its timeout
    pub fn for_endpoint(endpoint: &Endpoint) -> Result<Self> {
        let mut socket = Self::new(endpoint.host.clone(), endpoint.tcp_port()?);
        if let Some(timeout) = endpoint.timeout {
            socket.set_timeout(timeout);
        }
        Ok(socket)
    }

    /// Set the timeout for connecting and for the authentication handshake
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Remote host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connect and handshake timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// `host:port` label for logs and transports
    pub fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open a fresh TCP stream
    ///
    /// Honours the connect timeout; an expired timeout is reported as an I/O
    /// error of kind `TimedOut`.
    pub async fn open(&self) -> Result<TcpStream> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out after {:?}", self.peer(), timeout),
                )
            })??,
            None => connect.await?,
        };
        stream.set_nodelay(true)?;
        tracing::trace!(peer = %self.peer(), "socket opened");
        Ok(stream)
    }
}
