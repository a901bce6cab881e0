//! Broker connections and their initial acquisition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::message::{DeliveryStream, Message};
use crate::config::BrokerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("connection to {url} failed: {cause}")]
    ConnectionFailed { url: String, cause: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("publish to {exchange} with key {routing_key} failed: {cause}")]
    PublishFailed {
        exchange: String,
        routing_key: String,
        cause: String,
    },

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
}

impl BrokerError {
    /// Returns true if this error is transient and can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed { .. }
                | BrokerError::ConnectionClosed
                | BrokerError::PublishFailed { .. }
        )
    }
}

/// Opens connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Connection>, BrokerError>;
}

/// A long-lived broker connection, shared by many concurrent publishers and
/// consumers. Callers open one [`Channel`] per logical unit of work instead
/// of sharing a channel.
///
/// Recovering from transient network loss is up to the implementation.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn Channel>, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    fn is_closed(&self) -> bool;
}

/// A lightweight session over a [`Connection`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// Idempotent.
    async fn declare_topic_exchange(&self, name: &str) -> Result<(), BrokerError>;

    /// Idempotent.
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError>;

    /// Idempotent.
    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str)
        -> Result<(), BrokerError>;

    async fn publish(&self, exchange: &str, message: Message) -> Result<(), BrokerError>;

    /// Start consuming. Deliveries stay unacknowledged until settled.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;
}

/// Which side of the process a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Producer,
    Consumer,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Producer => "producer",
            ConnectionRole::Consumer => "consumer",
        }
    }
}

/// Try to connect up to `max_retries` times, sleeping `timeout` after each
/// failure.
///
/// Returns `None` once retries are exhausted: the caller runs without a
/// broker rather than failing.
pub async fn connect(
    connector: &dyn Connector,
    url: &str,
    timeout: Duration,
    max_retries: u32,
) -> Option<Arc<dyn Connection>> {
    for attempt in 1..=max_retries {
        match connector.connect(url).await {
            Ok(connection) => {
                info!(attempt, "event broker is alive");
                return Some(connection);
            }
            Err(err) => {
                info!(
                    attempt,
                    max_retries,
                    sleep_secs = timeout.as_secs(),
                    error = %err,
                    "waiting for event broker"
                );
                tokio::time::sleep(timeout).await;
            }
        }
    }
    error!(url, max_retries, "failed to connect to event broker");
    None
}

/// Acquires and owns the process's broker connections.
///
/// Producer and consumer traffic get separate connections so slow consumers
/// never stall publishes. The manager is built once at startup and passed to
/// whoever needs a connection.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    url: String,
    timeout: Duration,
    max_retries: u32,
    acquired: Mutex<Vec<(ConnectionRole, Arc<dyn Connection>)>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        url: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            connector,
            url: url.into(),
            timeout,
            max_retries,
            acquired: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(connector: Arc<dyn Connector>, config: &BrokerConfig) -> Self {
        Self::new(
            connector,
            config.url.clone(),
            config.connect_timeout,
            config.connect_retries,
        )
    }

    /// Connection for `role`, reusing one acquired earlier if still open.
    pub async fn connect(&self, role: ConnectionRole) -> Option<Arc<dyn Connection>> {
        let mut acquired = self.acquired.lock().await;
        if let Some((_, connection)) = acquired
            .iter()
            .find(|(r, connection)| *r == role && !connection.is_closed())
        {
            return Some(Arc::clone(connection));
        }

        info!(role = role.as_str(), "connecting to event broker");
        let connection = connect(
            self.connector.as_ref(),
            &self.url,
            self.timeout,
            self.max_retries,
        )
        .await?;
        acquired.push((role, Arc::clone(&connection)));
        Some(connection)
    }

    /// Close every connection acquired so far.
    pub async fn close(&self) {
        let acquired: Vec<_> = self.acquired.lock().await.drain(..).collect();
        for (role, connection) in acquired {
            if let Err(err) = connection.close().await {
                warn!(role = role.as_str(), error = %err, "error closing broker connection");
            } else {
                info!(role = role.as_str(), "broker connection closed");
            }
        }
    }
}
