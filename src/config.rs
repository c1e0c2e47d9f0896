//! Service configuration, read from the environment.
//!
//! | Variable                 | Default                    |
//! |--------------------------|----------------------------|
//! | `BIND_ADDR`              | `0.0.0.0:8080`             |
//! | `METRICS_PORT`           | `9090`                     |
//! | `SCYLLA_NODE`            | `127.0.0.1:9042`           |
//! | `SCYLLA_KEYSPACE`        | `agents_ks`                |
//! | `REDIS_URL`              | `redis://127.0.0.1:6379`   |
//! | `RATE_LIMIT_PER_MINUTE`  | `100`                      |
//! | `RATE_LIMIT_WINDOW_SECS` | `60`                       |
//! | `PENDING_BATCH_LIMIT`    | `50`                       |
//! | `RETRY_MAX_ATTEMPTS`     | `3`                        |
//! | `RETRY_BASE_DELAY_MS`    | `1000`                     |
//! | `OUTBOUND_TIMEOUT_MS`    | `30000`                    |
//! | `MAX_MESSAGE_BYTES`      | `1048576`                  |

use std::str::FromStr;
use std::time::Duration;

use crate::messaging::{DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_PENDING_LIMIT};
use crate::utils::{RateLimitPolicy, RetryConfig};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_METRICS_PORT: u16 = 9090;
const DEFAULT_SCYLLA_NODE: &str = "127.0.0.1:9042";
const DEFAULT_SCYLLA_KEYSPACE: &str = "agents_ks";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} must be a valid number, got `{value}`")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    pub metrics_port: u16,
    pub scylla_node: String,
    pub scylla_keyspace: String,
    pub redis_url: String,
    pub rate_limit: RateLimitPolicy,
    pub pending_batch_limit: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub outbound_timeout: Duration,
    pub max_message_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let rate_limit = RateLimitPolicy {
            limit: positive(&lookup, "RATE_LIMIT_PER_MINUTE", 100)?,
            window: Duration::from_secs(positive(&lookup, "RATE_LIMIT_WINDOW_SECS", 60)?),
        };

        Ok(Self {
            bind_addr: text("BIND_ADDR", DEFAULT_BIND_ADDR),
            metrics_port: number(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT)?,
            scylla_node: text("SCYLLA_NODE", DEFAULT_SCYLLA_NODE),
            scylla_keyspace: text("SCYLLA_KEYSPACE", DEFAULT_SCYLLA_KEYSPACE),
            redis_url: text("REDIS_URL", DEFAULT_REDIS_URL),
            rate_limit,
            pending_batch_limit: positive(&lookup, "PENDING_BATCH_LIMIT", DEFAULT_PENDING_LIMIT)?,
            retry_max_attempts: positive(&lookup, "RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay: Duration::from_millis(number(&lookup, "RETRY_BASE_DELAY_MS", 1000)?),
            outbound_timeout: Duration::from_millis(positive(&lookup, "OUTBOUND_TIMEOUT_MS", 30_000)?),
            max_message_bytes: positive(&lookup, "MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?,
        })
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(self.retry_max_attempts)
            .with_initial_delay(self.retry_base_delay)
    }
}

fn number<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
    }
}

fn positive<T: FromStr + PartialEq + Default>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = number(lookup, var, default)?;
    if value == T::default() {
        return Err(ConfigError::Zero { var });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.scylla_keyspace, "agents_ks");
        assert_eq!(config.rate_limit, RateLimitPolicy::default());
        assert_eq!(config.pending_batch_limit, 50);
        assert_eq!(config.retry().max_attempts, 3);
        assert_eq!(config.retry().initial_delay, Duration::from_secs(1));
        assert_eq!(config.outbound_timeout, Duration::from_secs(30));
        assert_eq!(config.max_message_bytes, 1_048_576);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("RATE_LIMIT_PER_MINUTE", "5"),
            ("RATE_LIMIT_WINDOW_SECS", "10"),
            ("REDIS_URL", "redis://cache:6379"),
        ])
        .unwrap();
        assert_eq!(config.rate_limit.limit, 5);
        assert_eq!(config.rate_limit.window, Duration::from_secs(10));
        assert_eq!(config.redis_url, "redis://cache:6379");
    }

    #[test]
    fn test_invalid_number() {
        assert_eq!(
            config(&[("METRICS_PORT", "ninety")]),
            Err(ConfigError::InvalidNumber {
                var: "METRICS_PORT",
                value: "ninety".to_string()
            })
        );
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert_eq!(
            config(&[("RATE_LIMIT_PER_MINUTE", "0")]),
            Err(ConfigError::Zero {
                var: "RATE_LIMIT_PER_MINUTE"
            })
        );
    }
}
