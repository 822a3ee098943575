use std::time::Duration;

use crate::utils::retry::RetryConfig;

// ============================================================================
// Configuration - loaded from the environment
// ============================================================================
//
//   ES_BACKEND               memory | postgres        (default: memory)
//   DATABASE_URL             required for postgres
//   ES_MAX_CONNECTIONS       pool size                (default: 5)
//   ES_OPERATION_TIMEOUT_MS  per backend call, unset = no timeout
//   ES_RETRY_MAX_ATTEMPTS    conflict retries         (default: 3)
//   ES_RETRY_INITIAL_DELAY_MS                         (default: 100)
//
// Malformed values are errors, never silently replaced by defaults.
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend: Backend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub operation_timeout: Option<Duration>,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            database_url: None,
            max_connections: 5,
            operation_timeout: None,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source, e.g. a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend = match lookup("ES_BACKEND").as_deref() {
            None | Some("memory") => Backend::Memory,
            Some("postgres") => Backend::Postgres,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "ES_BACKEND",
                    value: other.to_string(),
                    reason: "expected \"memory\" or \"postgres\"".to_string(),
                })
            }
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        if backend == Backend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let max_connections =
            parse::<u32>(&lookup, "ES_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                name: "ES_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let operation_timeout =
            parse::<u64>(&lookup, "ES_OPERATION_TIMEOUT_MS")?.map(Duration::from_millis);

        let mut retry = defaults.retry;
        if let Some(attempts) = parse::<u32>(&lookup, "ES_RETRY_MAX_ATTEMPTS")? {
            retry.max_attempts = attempts.max(1);
        }
        if let Some(delay) = parse::<u64>(&lookup, "ES_RETRY_INITIAL_DELAY_MS")? {
            retry.initial_delay = Duration::from_millis(delay);
        }

        Ok(Self {
            backend,
            database_url,
            max_connections,
            operation_timeout,
            retry,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let err = config_from(&[("ES_BACKEND", "postgres")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));

        let config = config_from(&[
            ("ES_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/es"),
            ("ES_MAX_CONNECTIONS", "12"),
        ])
        .unwrap();
        assert_eq!(config.backend, Backend::Postgres);
        assert_eq!(config.max_connections, 12);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let err = config_from(&[("ES_BACKEND", "cassandra")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ES_BACKEND", .. }));
    }

    #[test]
    fn test_malformed_numbers_are_rejected() {
        let err = config_from(&[("ES_OPERATION_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ES_OPERATION_TIMEOUT_MS", .. }));

        let err = config_from(&[("ES_MAX_CONNECTIONS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ES_MAX_CONNECTIONS", .. }));
    }

    #[test]
    fn test_timeout_and_retry_overrides() {
        let config = config_from(&[
            ("ES_OPERATION_TIMEOUT_MS", "250"),
            ("ES_RETRY_MAX_ATTEMPTS", "7"),
            ("ES_RETRY_INITIAL_DELAY_MS", "10"),
        ])
        .unwrap();

        assert_eq!(config.operation_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(10));
    }
}
