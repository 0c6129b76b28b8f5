//! Digest (SCRAM-SHA-256 over SASL framing) negotiator

use super::scram::{self, ScramClient};
use super::{AuthContext, AuthNegotiator, LoginConfig};
use crate::connection::{Socket, Transport};
use crate::protocol::{decode_sasl_frame, encode_sasl_frame, SaslFrame, SaslStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::io;
use tracing::Instrument;

/// Authenticates with a shared secret using SCRAM-SHA-256
#[derive(Debug, Clone)]
pub struct DigestNegotiator {
    login: LoginConfig,
}

impl DigestNegotiator {
    /// Mechanism name
    pub const MECHANISM: &'static str = "digest";

    /// Create a negotiator for the given login
    pub fn new(login: LoginConfig) -> Self {
        Self { login }
    }
}

#[async_trait]
impl AuthNegotiator for DigestNegotiator {
    fn mechanism(&self) -> &str {
        Self::MECHANISM
    }

    async fn authenticate(
        &self,
        socket: &Socket,
        host: &str,
        as_user: Option<&str>,
    ) -> Result<Transport> {
        let ctx = AuthContext::with_secret(&self.login, as_user)?;
        let stream = socket.open().await?;
        let mut transport = Transport::from_tcp(stream, socket.peer(), Self::MECHANISM);

        let span = tracing::debug_span!(
            "digest_negotiation",
            host = %host,
            principal = %ctx.principal(),
            as_user = ?ctx.as_user()
        );
        let handshake = negotiate(&mut transport, &ctx).instrument(span);
        let outcome = match socket.timeout() {
            Some(timeout) => tokio::time::timeout(timeout, handshake)
                .await
                .unwrap_or_else(|_| {
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("negotiation with {} timed out after {:?}", socket.peer(), timeout),
                    )
                    .into())
                }),
            None => handshake.await,
        };
        match outcome {
            Ok(()) => Ok(transport),
            Err(e) => {
                // The stream is unusable after a failed handshake
                transport.close_quietly().await;
                Err(e)
            }
        }
    }
}

/// Run the client side of the SASL exchange on an open transport
pub(crate) async fn negotiate(transport: &mut Transport, ctx: &AuthContext) -> Result<()> {
    let mut read_buf = BytesMut::with_capacity(1024);
    let mut client = ScramClient::with_authzid(
        ctx.principal().to_string(),
        ctx.secret().to_string(),
        ctx.as_user().map(str::to_string),
    );

    send_frame(transport, SaslStatus::Start, scram::MECHANISM.as_bytes()).await?;
    send_frame(transport, SaslStatus::Ok, client.client_first().as_bytes()).await?;
    tracing::debug!("sent SCRAM client first message");

    let server_first = expect_frame(transport, &mut read_buf, SaslStatus::Ok).await?;
    let server_first = utf8(&server_first, "server first message")?;
    let (client_final, state) = client
        .client_final(&server_first)
        .map_err(|e| Error::Authentication(format!("SCRAM error: {}", e)))?;

    send_frame(transport, SaslStatus::Ok, client_final.as_bytes()).await?;
    tracing::debug!("sent SCRAM client final message");

    let server_final = expect_frame(transport, &mut read_buf, SaslStatus::Complete).await?;
    let server_final = utf8(&server_final, "server final message")?;
    client
        .verify_server_final(&server_final, &state)
        .map_err(|e| Error::Authentication(format!("SCRAM verification failed: {}", e)))?;

    tracing::debug!("SCRAM-SHA-256 authentication successful");
    Ok(())
}

async fn send_frame(transport: &mut Transport, status: SaslStatus, payload: &[u8]) -> Result<()> {
    let buf = encode_sasl_frame(&SaslFrame::new(status, payload.to_vec()))?;
    transport.write_all(&buf).await?;
    transport.flush().await?;
    Ok(())
}

async fn receive_frame(transport: &mut Transport, read_buf: &mut BytesMut) -> Result<SaslFrame> {
    loop {
        match decode_sasl_frame(read_buf) {
            Ok((frame, consumed)) => {
                read_buf.advance(consumed);
                return Ok(frame);
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
            Err(e) => return Err(Error::Protocol(e.to_string())),
        }

        // Need more data
        let n = transport.read_buf(read_buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
    }
}

/// Receive a frame, turning peer rejections into authentication errors
async fn expect_frame(
    transport: &mut Transport,
    read_buf: &mut BytesMut,
    expected: SaslStatus,
) -> Result<Vec<u8>> {
    let frame = receive_frame(transport, read_buf).await?;
    if frame.status.is_failure() {
        let reason = frame.payload_str().unwrap_or("<binary>").to_string();
        return Err(Error::Authentication(format!(
            "server rejected negotiation ({:?}): {}",
            frame.status, reason
        )));
    }
    if frame.status != expected {
        return Err(Error::Protocol(format!(
            "expected {:?} negotiation frame, got {:?}",
            expected, frame.status
        )));
    }
    Ok(frame.payload.to_vec())
}

fn utf8(payload: &[u8], what: &str) -> Result<String> {
    String::from_utf8(payload.to_vec())
        .map_err(|e| Error::Authentication(format!("invalid UTF-8 in {}: {}", what, e)))
}
