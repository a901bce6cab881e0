//! Runtime configuration, loaded from environment variables.
//!
//! | Variable                       | Default                   |
//! |--------------------------------|---------------------------|
//! | `BROKER_URL`                   | `amqp://localhost:5672/%2f` |
//! | `BROKER_CONNECT_RETRIES`       | `3`                       |
//! | `BROKER_CONNECT_TIMEOUT_SECS`  | `5`                       |
//! | `BROKER_PUBLISH_RETRIES`       | `3`                       |
//! | `BROKER_PUBLISH_BACKOFF_SECS`  | `1`                       |
//! | `BROKER_REQUEUE_BACKOFF_SECS`  | `1`                       |
//! | `CACHE_HOST`                   | `localhost`               |
//! | `CACHE_PORT`                   | `6379`                    |
//! | `CACHE_TTL_SECS`               | `60`                      |
//! | `EVENTS_ENABLED`               | `true`                    |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Outbound notifications go here.
pub const PUBLISH_EXCHANGE: &str = "topic_customers";

/// Inbound compliance commands arrive here.
pub const CONSUME_EXCHANGE: &str = "topic_compliance";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration {var}: {reason}")]
    Invalid { var: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub url: String,
    /// Connection attempts at startup before running without a broker.
    pub connect_retries: u32,
    /// Sleep after each failed connection attempt.
    pub connect_timeout: Duration,
    pub publish_exchange: String,
    pub consume_exchange: String,
    /// Attempts per notification, including the first.
    pub publish_retries: u32,
    /// Base of the linear publish backoff.
    pub publish_backoff: Duration,
    /// Base of the consumer's pause after a requeued delivery.
    pub requeue_backoff: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672/%2f".to_string(),
            connect_retries: 3,
            connect_timeout: Duration::from_secs(5),
            publish_exchange: PUBLISH_EXCHANGE.to_string(),
            consume_exchange: CONSUME_EXCHANGE.to_string(),
            publish_retries: 3,
            publish_backoff: Duration::from_secs(1),
            requeue_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    /// Lifetime of every cached snapshot.
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub broker: BrokerConfig,
    pub cache: CacheConfig,
    /// When false, notifications are logged instead of published.
    pub events_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            cache: CacheConfig::default(),
            events_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from the process environment. Unset variables keep
    /// their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let vars = Vars { lookup: &lookup };

        let broker = BrokerConfig {
            url: vars.string("BROKER_URL", defaults.broker.url),
            connect_retries: vars.parse("BROKER_CONNECT_RETRIES", defaults.broker.connect_retries)?,
            connect_timeout: vars.secs("BROKER_CONNECT_TIMEOUT_SECS", defaults.broker.connect_timeout)?,
            publish_exchange: defaults.broker.publish_exchange,
            consume_exchange: defaults.broker.consume_exchange,
            publish_retries: vars.parse("BROKER_PUBLISH_RETRIES", defaults.broker.publish_retries)?,
            publish_backoff: vars.secs("BROKER_PUBLISH_BACKOFF_SECS", defaults.broker.publish_backoff)?,
            requeue_backoff: vars.secs("BROKER_REQUEUE_BACKOFF_SECS", defaults.broker.requeue_backoff)?,
        };

        let cache = CacheConfig {
            host: vars.string("CACHE_HOST", defaults.cache.host),
            port: vars.parse("CACHE_PORT", defaults.cache.port)?,
            ttl: vars.secs("CACHE_TTL_SECS", defaults.cache.ttl)?,
        };

        let events_enabled = vars.flag("EVENTS_ENABLED", defaults.events_enabled)?;

        Ok(Config {
            broker,
            cache,
            events_enabled,
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, var: &str, default: String) -> String {
        self.get(var).unwrap_or(default)
    }

    fn parse<T>(&self, var: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            Some(value) => value.parse().map_err(|err: T::Err| ConfigError::Invalid {
                var: var.to_string(),
                reason: format!("{value:?}: {err}"),
            }),
            None => Ok(default),
        }
    }

    fn secs(&self, var: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(var, default.as_secs()).map(Duration::from_secs)
    }

    fn flag(&self, var: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(var) {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: format!("{value:?} is not a boolean"),
                }),
            },
            None => Ok(default),
        }
    }
}
