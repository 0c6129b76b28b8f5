//! Authentication negotiation
//!
//! A negotiator turns an unopened [`Socket`] into an authenticated
//! [`Transport`]. Which negotiator a connection uses is a pure function of its
//! [`ConnectionType`] and the process configuration, looked up in a
//! [`NegotiatorRegistry`].

mod digest;
mod plain;
mod registry;
pub mod scram;

pub use digest::DigestNegotiator;
pub use plain::PlainNegotiator;
pub use registry::{NegotiatorFactory, NegotiatorRegistry};
pub use scram::ScramClient;

use crate::config::{keys, Config};
use crate::connection::{Socket, Transport};
use crate::{Error, Result};
use async_trait::async_trait;

/// Turns a raw socket into an authenticated transport
///
/// Implementations must open a fresh stream from `socket` on every call and
/// close it before returning an error, so a failed attempt never leaks or
/// reuses a stream.
#[async_trait]
pub trait AuthNegotiator: Send + Sync {
    /// Mechanism name, used in logs and metrics
    fn mechanism(&self) -> &str;

    /// Connect and authenticate
    async fn authenticate(
        &self,
        socket: &Socket,
        host: &str,
        as_user: Option<&str>,
    ) -> Result<Transport>;
}

/// Login configuration resolved from process configuration
#[derive(Clone, PartialEq, Eq)]
pub struct LoginConfig {
    principal: String,
    secret: Option<String>,
}

impl std::fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginConfig")
            .field("principal", &self.principal)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl LoginConfig {
    /// Login for `principal` without a secret
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: None,
        }
    }

    /// Set the shared secret
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Read the login section of the process configuration
    ///
    /// The principal defaults to the current OS user.
    pub fn from_config(config: &Config) -> Result<Self> {
        let principal = match config.get_str(keys::AUTH_PRINCIPAL)? {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => whoami::username(),
        };
        let secret = config.get_str(keys::AUTH_SECRET)?.map(str::to_string);
        Ok(Self { principal, secret })
    }

    /// Principal name
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Whether a secret is configured
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }
}

/// Credentials for one connection attempt
///
/// Built from the login configuration plus the optional impersonation user.
#[derive(Clone)]
pub struct AuthContext {
    principal: String,
    secret: String,
    as_user: Option<String>,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .field("as_user", &self.as_user)
            .finish()
    }
}

impl AuthContext {
    /// Build a context that authenticates with a shared secret
    pub fn with_secret(login: &LoginConfig, as_user: Option<&str>) -> Result<Self> {
        let secret = login.secret.clone().ok_or_else(|| {
            Error::Authentication(format!(
                "no secret configured for principal '{}' ({})",
                login.principal,
                keys::AUTH_SECRET
            ))
        })?;
        Ok(Self {
            principal: login.principal.clone(),
            secret,
            as_user: as_user.filter(|u| !u.is_empty()).map(str::to_string),
        })
    }

    /// Authenticating principal
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Identity to act on behalf of, if any
    pub fn as_user(&self) -> Option<&str> {
        self.as_user.as_deref()
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_from_config() {
        let config = Config::new()
            .set(keys::AUTH_PRINCIPAL, "alice")
            .set(keys::AUTH_SECRET, "s3cret");
        let login = LoginConfig::from_config(&config).unwrap();
        assert_eq!(login.principal(), "alice");
        assert!(login.has_secret());
    }

    #[test]
    fn test_login_defaults_to_os_user() {
        let login = LoginConfig::from_config(&Config::new()).unwrap();
        assert_eq!(login.principal(), whoami::username());
        assert!(!login.has_secret());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let login = LoginConfig::new("alice").secret("hunter2");
        let out = format!("{:?}", login);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("<redacted>"));

        let ctx = AuthContext::with_secret(&login, Some("bob")).unwrap();
        let out = format!("{:?}", ctx);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("bob"));
    }

    #[test]
    fn test_context_requires_secret() {
        let login = LoginConfig::new("alice");
        let result = AuthContext::with_secret(&login, None);
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[test]
    fn test_context_ignores_empty_as_user() {
        let login = LoginConfig::new("alice").secret("pw");
        let ctx = AuthContext::with_secret(&login, Some("")).unwrap();
        assert_eq!(ctx.as_user(), None);
        assert_eq!(ctx.principal(), "alice");
        assert_eq!(ctx.secret(), "pw");
    }
}
