//! Environment-driven infrastructure configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::{DEFAULT_LOCK_PREFIX, DEFAULT_LOCK_TTL};

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{var} must be set when USE_PERSISTENT_STORES=true")]
    Missing { var: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraConfig {
    /// Postgres event log / read models and Redis locks instead of in-memory.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub lock_ttl_ms: u64,
    pub lock_prefix: String,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            lock_ttl_ms: DEFAULT_LOCK_TTL.as_millis() as u64,
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
        }
    }
}

impl InfraConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source (`from_env` passes the process environment).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let use_persistent_stores = match lookup("USE_PERSISTENT_STORES") {
            Some(raw) => raw.trim().parse::<bool>().map_err(|e| ConfigError::Invalid {
                var: "USE_PERSISTENT_STORES",
                reason: e.to_string(),
            })?,
            None => defaults.use_persistent_stores,
        };

        let lock_ttl_ms = match lookup("AGGREGATE_LOCK_TTL_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        var: "AGGREGATE_LOCK_TTL_MS",
                        reason: "must be greater than zero".into(),
                    });
                }
                Ok(ms) => ms,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        var: "AGGREGATE_LOCK_TTL_MS",
                        reason: e.to_string(),
                    });
                }
            },
            None => defaults.lock_ttl_ms,
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing { var: "DATABASE_URL" });
        }

        Ok(Self {
            use_persistent_stores,
            database_url,
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            lock_ttl_ms,
            lock_prefix: lookup("AGGREGATE_LOCK_PREFIX").unwrap_or(defaults.lock_prefix),
        })
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_in_memory() {
        let config = InfraConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, InfraConfig::default());
        assert_eq!(config.lock_ttl(), Duration::from_secs(30));
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.lock_prefix, "policystream:lock");
    }

    #[test]
    fn persistent_mode_reads_connection_strings() {
        let config = InfraConfig::from_lookup(lookup(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/policystream"),
            ("REDIS_URL", "redis://cache:6379"),
            ("AGGREGATE_LOCK_TTL_MS", "5000"),
            ("AGGREGATE_LOCK_PREFIX", "ps:test"),
        ]))
        .unwrap();

        assert!(config.use_persistent_stores);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/policystream"));
        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.lock_ttl(), Duration::from_millis(5000));
        assert_eq!(config.lock_prefix, "ps:test");
    }

    #[test]
    fn persistent_mode_requires_database_url() {
        let err = InfraConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "true")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing { var: "DATABASE_URL" });
    }

    #[test]
    fn bad_numbers_are_invalid() {
        for raw in ["soon", "-1", "0"] {
            let err = InfraConfig::from_lookup(lookup(&[("AGGREGATE_LOCK_TTL_MS", raw)])).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: "AGGREGATE_LOCK_TTL_MS", .. }),
                "{raw}: {err}"
            );
        }
    }

    #[test]
    fn bad_flag_is_invalid() {
        let err = InfraConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "yes")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "USE_PERSISTENT_STORES", .. }));
    }
}
