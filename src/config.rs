//! Process-wide configuration
//!
//! A read-only map of configuration keys to JSON values. Callers build it once
//! per process (from whatever source they load settings from) and share it
//! between every [`ConnectionManager`](crate::client::ConnectionManager).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Well-known configuration keys
pub mod keys {
    /// Number of retries after the first failed connection attempt
    pub const RETRY_TIMES: &str = "storm.nimbus.retry.times";

    /// Base delay between attempts, in milliseconds
    pub const RETRY_INTERVAL_MS: &str = "storm.nimbus.retry.interval.millis";

    /// Upper bound of a single backoff delay, in milliseconds
    pub const RETRY_INTERVAL_CEILING_MS: &str = "storm.nimbus.retry.intervalceiling.millis";

    /// Transport plugin used when no per-service plugin is configured
    pub const THRIFT_TRANSPORT: &str = "storm.thrift.transport";

    /// Transport plugin for nimbus connections
    pub const NIMBUS_TRANSPORT: &str = "nimbus.thrift.transport";

    /// Transport plugin for DRPC and DRPC invocation connections
    pub const DRPC_TRANSPORT: &str = "drpc.thrift.transport";

    /// Transport plugin for supervisor connections
    pub const SUPERVISOR_TRANSPORT: &str = "supervisor.thrift.transport";

    /// Nimbus RPC port
    pub const NIMBUS_PORT: &str = "nimbus.thrift.port";

    /// DRPC request port
    pub const DRPC_PORT: &str = "drpc.port";

    /// DRPC invocations port
    pub const DRPC_INVOCATIONS_PORT: &str = "drpc.invocations.port";

    /// Supervisor RPC port
    pub const SUPERVISOR_PORT: &str = "supervisor.thrift.port";

    /// Principal used to authenticate
    pub const AUTH_PRINCIPAL: &str = "storm.auth.principal";

    /// Shared secret for digest authentication
    pub const AUTH_SECRET: &str = "storm.auth.secret";
}

/// Default values applied when a key is absent
pub mod defaults {
    /// Default retry count
    pub const RETRY_TIMES: i64 = 5;

    /// Default base retry interval (ms)
    pub const RETRY_INTERVAL_MS: i64 = 2_000;

    /// Default retry interval ceiling (ms)
    pub const RETRY_INTERVAL_CEILING_MS: i64 = 60_000;

    /// Default transport plugin
    pub const TRANSPORT: &str = "plain";
}

/// Read-only configuration map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: HashMap<String, Value>,
}

impl Config {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from a JSON object
    ///
    /// Returns an error if `value` is not an object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                values: map.into_iter().collect(),
            }),
            other => Err(Error::Config(format!(
                "configuration must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Set a value
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Raw value for a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether the key is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Read an integer value
    ///
    /// Accepts JSON integers, floats with no fractional part, and numeric
    /// strings. `null` is treated as absent.
    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        let value = match self.values.get(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(v) => v,
        };

        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };

        parsed.map(Some).ok_or_else(|| {
            Error::Config(format!(
                "{} must be an integer, got {}",
                key,
                type_name(value)
            ))
        })
    }

    /// Read an integer value, falling back to `default` when absent
    pub fn get_int_or(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self.get_int(key)?.unwrap_or(default))
    }

    /// Read a string value
    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(Error::Config(format!(
                "{} must be a string, got {}",
                key,
                type_name(other)
            ))),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_int_variants() {
        let config = Config::new()
            .set("a", 5)
            .set("b", "7")
            .set("c", 3.0)
            .set("d", Value::Null);

        assert_eq!(config.get_int("a").unwrap(), Some(5));
        assert_eq!(config.get_int("b").unwrap(), Some(7));
        assert_eq!(config.get_int("c").unwrap(), Some(3));
        assert_eq!(config.get_int("d").unwrap(), None);
        assert_eq!(config.get_int("missing").unwrap(), None);
    }

    #[test]
    fn test_get_int_rejects_non_integers() {
        let config = Config::new()
            .set("frac", 1.5)
            .set("word", "ten")
            .set("flag", true);

        assert!(matches!(config.get_int("frac"), Err(Error::Config(_))));
        assert!(matches!(config.get_int("word"), Err(Error::Config(_))));
        assert!(matches!(config.get_int("flag"), Err(Error::Config(_))));
    }

    #[test]
    fn test_get_int_or_default() {
        let config = Config::new().set(keys::RETRY_TIMES, 2);
        assert_eq!(config.get_int_or(keys::RETRY_TIMES, 9).unwrap(), 2);
        assert_eq!(
            config
                .get_int_or(keys::RETRY_INTERVAL_MS, defaults::RETRY_INTERVAL_MS)
                .unwrap(),
            2_000
        );
    }

    #[test]
    fn test_get_str() {
        let config = Config::new().set(keys::THRIFT_TRANSPORT, "digest").set("n", 1);
        assert_eq!(config.get_str(keys::THRIFT_TRANSPORT).unwrap(), Some("digest"));
        assert_eq!(config.get_str("missing").unwrap(), None);
        assert!(config.get_str("n").is_err());
    }

    #[test]
    fn test_from_json_object() {
        let config = Config::from_json(json!({
            "storm.nimbus.retry.times": 3,
            "nimbus.thrift.port": "6627"
        }))
        .unwrap();

        assert_eq!(config.get_int(keys::RETRY_TIMES).unwrap(), Some(3));
        assert_eq!(config.get_int(keys::NIMBUS_PORT).unwrap(), Some(6627));
        assert!(config.contains(keys::NIMBUS_PORT));
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(Config::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_deserialize_transparent() {
        let config: Config = serde_json::from_str(r#"{"drpc.port": 3772}"#).unwrap();
        assert_eq!(config.get_int(keys::DRPC_PORT).unwrap(), Some(3772));
    }
}
