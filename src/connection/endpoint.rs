//! Logical service types and endpoint resolution

use crate::config::{defaults, keys, Config};
use crate::{Error, Result};
use std::time::Duration;

/// Logical kind of service a client connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Cluster master
    Nimbus,
    /// DRPC request endpoint
    Drpc,
    /// DRPC invocations endpoint
    DrpcInvocations,
    /// Per-node supervisor
    Supervisor,
    /// Inert client that never opens a connection
    LocalFake,
}

impl ConnectionType {
    /// Every connection type, in declaration order
    pub const ALL: [ConnectionType; 5] = [
        ConnectionType::Nimbus,
        ConnectionType::Drpc,
        ConnectionType::DrpcInvocations,
        ConnectionType::Supervisor,
        ConnectionType::LocalFake,
    ];

    /// Configuration key holding the port, plus the built-in default
    fn port_rule(&self) -> Option<(&'static str, i64)> {
        match self {
            Self::Nimbus => Some((keys::NIMBUS_PORT, 6627)),
            Self::Drpc => Some((keys::DRPC_PORT, 3772)),
            Self::DrpcInvocations => Some((keys::DRPC_INVOCATIONS_PORT, 3773)),
            Self::Supervisor => Some((keys::SUPERVISOR_PORT, 6628)),
            Self::LocalFake => None,
        }
    }

    /// Configuration key selecting this type's transport plugin
    fn transport_key(&self) -> Option<&'static str> {
        match self {
            Self::Nimbus => Some(keys::NIMBUS_TRANSPORT),
            Self::Drpc | Self::DrpcInvocations => Some(keys::DRPC_TRANSPORT),
            Self::Supervisor => Some(keys::SUPERVISOR_TRANSPORT),
            Self::LocalFake => None,
        }
    }

    /// Whether this type legitimately never connects
    pub fn is_no_op(&self) -> bool {
        matches!(self, Self::LocalFake)
    }

    /// Port to use when the caller did not supply one
    ///
    /// No-op types resolve to 0.
    pub fn default_port(&self, config: &Config) -> Result<i64> {
        match self.port_rule() {
            Some((key, fallback)) => config.get_int_or(key, fallback),
            None => Ok(0),
        }
    }

    /// Name of the transport plugin configured for this type
    ///
    /// Falls back to the process-wide plugin, then to `plain`.
    pub fn transport_plugin(&self, config: &Config) -> Result<String> {
        if let Some(key) = self.transport_key() {
            if let Some(name) = config.get_str(key)? {
                return Ok(name.to_string());
            }
        }
        Ok(config
            .get_str(keys::THRIFT_TRANSPORT)?
            .unwrap_or(defaults::TRANSPORT)
            .to_string())
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nimbus => write!(f, "nimbus"),
            Self::Drpc => write!(f, "drpc"),
            Self::DrpcInvocations => write!(f, "drpc-invocations"),
            Self::Supervisor => write!(f, "supervisor"),
            Self::LocalFake => write!(f, "local-fake"),
        }
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "nimbus" => Ok(Self::Nimbus),
            "drpc" => Ok(Self::Drpc),
            "drpc-invocations" => Ok(Self::DrpcInvocations),
            "supervisor" => Ok(Self::Supervisor),
            "local-fake" => Ok(Self::LocalFake),
            _ => Err(Error::Config(format!(
                "invalid connection type '{}': expected nimbus, drpc, drpc-invocations, supervisor, or local-fake",
                s
            ))),
        }
    }
}

/// Validated connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Remote host
    pub host: String,
    /// Effective port (0 for no-op types without a configured port)
    pub port: i64,
    /// Socket connect timeout
    pub timeout: Option<Duration>,
}

impl Endpoint {
    /// Validate caller input and resolve the effective port
    ///
    /// Fails with `InvalidArgument` if the host is blank, or if the resolved
    /// port is not a usable TCP port and `connection_type` is not a no-op type.
    pub fn resolve(
        connection_type: ConnectionType,
        config: &Config,
        host: &str,
        port: Option<i64>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        if host.trim().is_empty() {
            return Err(Error::InvalidArgument("host is not set".into()));
        }

        let port = match port {
            Some(p) => p,
            None => connection_type.default_port(config)?,
        };

        if !connection_type.is_no_op() && (port <= 0 || port > i64::from(u16::MAX)) {
            return Err(Error::InvalidArgument(format!("invalid port: {}", port)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            timeout,
        })
    }

    /// Port as a TCP port number
    pub fn tcp_port(&self) -> Result<u16> {
        u16::try_from(self.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid port: {}", self.port)))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
