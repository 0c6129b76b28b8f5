//! Error types

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while establishing or managing an authenticated connection
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an invalid host, port or retry policy value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration value missing, malformed or unsupported
    #[error("configuration error: {0}")]
    Config(String),

    /// Credentials rejected or handshake could not be completed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Peer sent something the negotiation protocol does not allow
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer closed the stream mid-exchange
    #[error("connection closed")]
    ConnectionClosed,

    /// A single negotiation attempt failed
    #[error("{mechanism} negotiation failed: {source}")]
    Negotiation {
        /// Mechanism that was negotiating
        mechanism: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Every permitted attempt failed
    #[error("gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Total number of attempts made
        attempts: u32,
        /// Failure of the last attempt
        #[source]
        source: Box<Error>,
    },

    /// Retry loop was stopped by its cancellation token
    #[error("connection attempt cancelled")]
    Cancelled,

    /// `reconnect()` could not install a new handle
    #[error("failed to connect to {host}:{port}: {source}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Target port
        port: i64,
        /// Cause of the failure
        #[source]
        source: Box<Error>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Wrap a single attempt's failure with the mechanism that produced it
    pub fn negotiation(mechanism: impl Into<String>, source: Error) -> Self {
        Error::Negotiation {
            mechanism: mechanism.into(),
            source: Box::new(source),
        }
    }

    /// True if the retry loop was cancelled, looking through `ConnectionFailed`
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::ConnectionFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// True if the retry budget ran out, looking through `ConnectionFailed`
    pub fn is_retry_exhausted(&self) -> bool {
        match self {
            Error::RetryExhausted { .. } => true,
            Error::ConnectionFailed { source, .. } => source.is_retry_exhausted(),
            _ => false,
        }
    }

    /// True for caller mistakes that retrying can never fix
    pub fn is_invalid_argument(&self) -> bool {
        match self {
            Error::InvalidArgument(_) => true,
            Error::ConnectionFailed { source, .. } => source.is_invalid_argument(),
            _ => false,
        }
    }

    /// Short label used for metrics and log fields
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Config(_) => "config",
            Error::Authentication(_) => "authentication",
            Error::Protocol(_) => "protocol",
            Error::ConnectionClosed => "connection_closed",
            Error::Negotiation { .. } => "negotiation",
            Error::RetryExhausted { .. } => "retry_exhausted",
            Error::Cancelled => "cancelled",
            Error::ConnectionFailed { .. } => "connection_failed",
            Error::Io(_) => "io",
        }
    }
}
