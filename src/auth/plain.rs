//! Unauthenticated transport

use super::AuthNegotiator;
use crate::connection::{Socket, Transport};
use crate::Result;
use async_trait::async_trait;

/// Opens the socket with no handshake
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainNegotiator;

impl PlainNegotiator {
    /// Mechanism name
    pub const MECHANISM: &'static str = "plain";
}

#[async_trait]
impl AuthNegotiator for PlainNegotiator {
    fn mechanism(&self) -> &str {
        Self::MECHANISM
    }

    async fn authenticate(
        &self,
        socket: &Socket,
        _host: &str,
        as_user: Option<&str>,
    ) -> Result<Transport> {
        let stream = socket.open().await?;
        if let Some(user) = as_user {
            tracing::debug!(as_user = %user, "plain transport cannot impersonate, ignoring as_user");
        }
        Ok(Transport::from_tcp(stream, socket.peer(), Self::MECHANISM))
    }
}
