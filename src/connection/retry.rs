//! Retry policy and the backoff connect loop

use super::{Socket, Transport};
use crate::auth::AuthNegotiator;
use crate::config::{defaults, keys, Config};
use crate::metrics::{counters, histograms};
use crate::{Error, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often and how patiently to retry a failed negotiation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_interval: Duration,
    ceiling: Duration,
    retry_forever: bool,
    cancel: Option<CancellationToken>,
}

impl RetryPolicy {
    /// Build a policy from raw values
    ///
    /// `max_attempts` counts retries after the first attempt, so `0` means a
    /// single attempt. Negative values are rejected.
    pub fn new(
        max_attempts: i64,
        base_interval_ms: i64,
        ceiling_ms: i64,
        retry_forever: bool,
    ) -> Result<Self> {
        let max_attempts = u32::try_from(max_attempts).map_err(|_| {
            Error::InvalidArgument(format!("invalid retry attempt count: {}", max_attempts))
        })?;
        Ok(Self {
            max_attempts,
            base_interval: non_negative_millis("retry interval", base_interval_ms)?,
            ceiling: non_negative_millis("retry interval ceiling", ceiling_ms)?,
            retry_forever,
            cancel: None,
        })
    }

    /// Read the three retry settings from configuration
    ///
    /// Missing keys fall back to the built-in defaults.
    pub fn from_config(config: &Config, retry_forever: bool) -> Result<Self> {
        Self::new(
            config.get_int_or(keys::RETRY_TIMES, defaults::RETRY_TIMES)?,
            config.get_int_or(keys::RETRY_INTERVAL_MS, defaults::RETRY_INTERVAL_MS)?,
            config.get_int_or(
                keys::RETRY_INTERVAL_CEILING_MS,
                defaults::RETRY_INTERVAL_CEILING_MS,
            )?,
            retry_forever,
        )
    }

    /// Attach a cancellation token that aborts the retry loop
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Retries permitted after the first attempt
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// First backoff delay
    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    /// Upper bound of any single backoff delay
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Whether the attempt budget is ignored
    pub fn retry_forever(&self) -> bool {
        self.retry_forever
    }

    /// Cancellation token, if any
    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    /// Delay schedule starting at the base interval
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.base_interval,
            ceiling: self.ceiling,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn gives_up_after(&self, attempts: u32) -> bool {
        !self.retry_forever && attempts > self.max_attempts
    }
}

fn non_negative_millis(what: &str, ms: i64) -> Result<Duration> {
    u64::try_from(ms)
        .map(Duration::from_millis)
        .map_err(|_| Error::InvalidArgument(format!("invalid {}: {}ms", what, ms)))
}

/// Exponential backoff schedule
///
/// Each delay is the previous one doubled, and no delay exceeds the ceiling.
/// A zero base yields zero delays forever.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    ceiling: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next.min(self.ceiling);
        self.next = self.next.saturating_mul(2).min(self.ceiling);
        Some(delay)
    }
}

/// Drives repeated negotiation attempts under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct BackoffRetryConnector {
    policy: RetryPolicy,
}

impl BackoffRetryConnector {
    /// Create a connector for `policy`
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in force
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Negotiate until success, cancellation or an exhausted budget
    ///
    /// Every attempt asks the negotiator to open its own stream from `socket`.
    /// Failed attempts are wrapped in [`Error::Negotiation`]; the last one is
    /// carried by [`Error::RetryExhausted`].
    pub async fn connect(
        &self,
        negotiator: &dyn AuthNegotiator,
        socket: &Socket,
        host: &str,
        as_user: Option<&str>,
    ) -> Result<Transport> {
        let mechanism = negotiator.mechanism();
        let mut backoff = self.policy.backoff();
        let mut attempts: u32 = 0;

        loop {
            if self.policy.is_cancelled() {
                tracing::debug!(mechanism, attempts, "connect cancelled before attempt");
                counters::connect_cancelled(mechanism);
                return Err(Error::Cancelled);
            }

            let err = match negotiator.authenticate(socket, host, as_user).await {
                Ok(transport) => {
                    counters::connect_attempt(mechanism, "success");
                    histograms::attempts_to_connect(mechanism, attempts + 1);
                    tracing::debug!(
                        mechanism,
                        attempt = attempts + 1,
                        transport_id = transport.id(),
                        "negotiation succeeded"
                    );
                    return Ok(transport);
                }
                Err(e) => Error::negotiation(mechanism, e),
            };

            counters::connect_attempt(mechanism, "failure");
            attempts = attempts.saturating_add(1);

            if self.policy.gives_up_after(attempts) {
                tracing::warn!(
                    mechanism,
                    attempts,
                    peer = %socket.peer(),
                    error = %err,
                    "giving up on connection"
                );
                counters::retry_exhausted(mechanism);
                return Err(Error::RetryExhausted {
                    attempts,
                    source: Box::new(err),
                });
            }

            // The schedule never ends
            let delay = backoff.next().unwrap_or(self.policy.ceiling);
            tracing::debug!(
                mechanism,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "negotiation failed, backing off"
            );
            histograms::backoff_delay(mechanism, delay);
            self.sleep(delay, mechanism).await?;
        }
    }

    async fn sleep(&self, delay: Duration, mechanism: &str) -> Result<()> {
        match &self.policy.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(mechanism, "backoff interrupted by cancellation");
                        counters::connect_cancelled(mechanism);
                        Err(Error::Cancelled)
                    }
                    _ = tokio::time::sleep(delay) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}
