//! Configuration loading and representation.

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be set when USE_PERSISTENT_STORES=true")]
    Missing { name: &'static str },

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings, read from raw environment variables.
///
/// | variable | default |
/// |---|---|
/// | `USE_PERSISTENT_STORES` | `false` |
/// | `DATABASE_URL` | required when persistent |
/// | `DATABASE_MAX_CONNECTIONS` | `5` |
/// | `STOCK_MAX_CONFLICT_ATTEMPTS` | `5` (first attempt included, at least 1) |
/// | `STOCK_RETRY_BASE_DELAY_MS` | `20` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockConfig {
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub max_conflict_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            database_max_connections: 5,
            max_conflict_attempts: 5,
            retry_base_delay: Duration::from_millis(20),
        }
    }
}

impl StockConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source (the process environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let use_persistent_stores =
            parse_or("USE_PERSISTENT_STORES", &lookup, defaults.use_persistent_stores)?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing {
                name: "DATABASE_URL",
            });
        }

        let database_max_connections = parse_or(
            "DATABASE_MAX_CONNECTIONS",
            &lookup,
            defaults.database_max_connections,
        )?;
        if database_max_connections == 0 {
            return Err(ConfigError::Invalid {
                name: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        let max_conflict_attempts = parse_or(
            "STOCK_MAX_CONFLICT_ATTEMPTS",
            &lookup,
            defaults.max_conflict_attempts,
        )?;
        if max_conflict_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "STOCK_MAX_CONFLICT_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        let base_delay_ms: u64 = parse_or(
            "STOCK_RETRY_BASE_DELAY_MS",
            &lookup,
            defaults.retry_base_delay.as_millis() as u64,
        )?;

        Ok(Self {
            use_persistent_stores,
            database_url,
            database_max_connections,
            max_conflict_attempts,
            retry_base_delay: Duration::from_millis(base_delay_ms),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_conflict_attempts,
            base_delay: self.retry_base_delay,
            ..RetryPolicy::default()
        }
    }
}

fn parse_or<T, F>(name: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
