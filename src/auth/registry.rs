//! Transport plugin lookup

use super::{AuthNegotiator, DigestNegotiator, LoginConfig, PlainNegotiator};
use crate::config::Config;
use crate::connection::ConnectionType;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a negotiator for a connection type, configuration and login
pub type NegotiatorFactory = Arc<
    dyn Fn(ConnectionType, &Config, &LoginConfig) -> Result<Arc<dyn AuthNegotiator>>
        + Send
        + Sync,
>;

/// Strategy table mapping transport plugin names to negotiators
///
/// The plugin name for a connection comes from
/// [`ConnectionType::transport_plugin`]. The default table knows `plain` and
/// `digest`; `kerberos` is recognised but reported as unsupported.
#[derive(Clone)]
pub struct NegotiatorRegistry {
    factories: HashMap<String, NegotiatorFactory>,
}

impl std::fmt::Debug for NegotiatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("NegotiatorRegistry")
            .field("plugins", &names)
            .finish()
    }
}

impl Default for NegotiatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(PlainNegotiator::MECHANISM, |_, _, _| {
            Ok(Arc::new(PlainNegotiator) as Arc<dyn AuthNegotiator>)
        });
        registry.register(DigestNegotiator::MECHANISM, |_, _, login| {
            Ok(Arc::new(DigestNegotiator::new(login.clone())) as Arc<dyn AuthNegotiator>)
        });
        registry.register("kerberos", |ty, _, _| {
            Err(Error::Config(format!(
                "kerberos transport is not supported for {} connections; register a custom negotiator",
                ty
            )))
        });
        registry
    }
}

impl NegotiatorRegistry {
    /// Table with no plugins
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) a plugin
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(ConnectionType, &Config, &LoginConfig) -> Result<Arc<dyn AuthNegotiator>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register a plugin that always yields the same negotiator
    pub fn register_instance(
        &mut self,
        name: impl Into<String>,
        negotiator: Arc<dyn AuthNegotiator>,
    ) -> &mut Self {
        self.register(name, move |_, _, _| Ok(negotiator.clone()))
    }

    /// Whether a plugin name is known
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Resolve the negotiator for a connection type
    pub fn negotiator_for(
        &self,
        connection_type: ConnectionType,
        config: &Config,
        login: &LoginConfig,
    ) -> Result<Arc<dyn AuthNegotiator>> {
        let name = connection_type.transport_plugin(config)?;
        let factory = self.factories.get(&name).ok_or_else(|| {
            Error::Config(format!(
                "unknown transport plugin '{}' for {} connections",
                name, connection_type
            ))
        })?;
        factory(connection_type, config, login)
    }
}
