//! Connection management
//!
//! This module handles:
//! * Endpoint resolution per connection type
//! * Unopened socket descriptors and authenticated transports
//! * Backoff retry of the connect-and-authenticate step
//! * Lifecycle state machine enforcement

mod endpoint;
mod retry;
mod socket;
mod state;
mod transport;

pub use endpoint::{ConnectionType, Endpoint};
pub use retry::{Backoff, BackoffRetryConnector, RetryPolicy};
pub use socket::Socket;
pub use state::ConnectionState;
pub use transport::{IoStream, SharedTransport, Transport};
