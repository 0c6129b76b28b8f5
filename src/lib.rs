//! authconn: resilient, authenticated connections for RPC clients
//!
//! A [`ConnectionManager`] owns at most one authenticated transport to a
//! cluster service (nimbus, DRPC, supervisor). It resolves the endpoint from
//! configuration, picks an authentication negotiator for the service kind,
//! and retries the connect-and-authenticate step with capped exponential
//! backoff until it succeeds, runs out of attempts, or is cancelled.
//!
//! ```no_run
//! # async fn example() -> authconn::Result<()> {
//! use authconn::{config::keys, Config, ConnectionManager, ConnectionType};
//!
//! let config = Config::new()
//!     .set(keys::NIMBUS_TRANSPORT, "digest")
//!     .set(keys::AUTH_PRINCIPAL, "svc")
//!     .set(keys::AUTH_SECRET, "s3cret");
//!
//! let manager = ConnectionManager::new(config, ConnectionType::Nimbus, "nimbus.local", None, None, None).await?;
//! if let Some(transport) = manager.transport() {
//!     println!("connected to {}", transport.peer());
//! }
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;

pub use auth::{AuthNegotiator, LoginConfig, NegotiatorRegistry};
pub use client::{ConnectionHandle, ConnectionManager, ConnectionManagerBuilder};
pub use config::Config;
pub use connection::{
    BackoffRetryConnector, ConnectionState, ConnectionType, Endpoint, RetryPolicy,
    SharedTransport, Socket, Transport,
};
pub use error::{Error, Result};
pub use protocol::BinaryProtocol;
