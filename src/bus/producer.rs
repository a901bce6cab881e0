//! Outbound notifications.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, instrument};

use super::connection::{BrokerError, Connection};
use super::retry::RetryPolicy;
use super::routing::Notification;
use crate::config::BrokerConfig;

/// A notification could not be handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery of {routing_key} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        routing_key: String,
        attempts: u32,
        last_error: BrokerError,
    },
}

/// Publishes directory notifications.
#[async_trait]
pub trait EventProducer: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<(), DeliveryError>;
}

/// Publishes to a topic exchange over a shared connection.
///
/// Every attempt opens its own channel, declares the exchange and publishes
/// once. Failed attempts are retried per the [`RetryPolicy`]; there is no
/// outbox, so a notification is lost once retries run out.
pub struct BrokerProducer {
    connection: Arc<dyn Connection>,
    exchange: String,
    retry: RetryPolicy,
}

impl BrokerProducer {
    pub fn new(connection: Arc<dyn Connection>, exchange: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            connection,
            exchange: exchange.into(),
            retry,
        }
    }

    pub fn from_config(connection: Arc<dyn Connection>, config: &BrokerConfig) -> Self {
        Self::new(
            connection,
            config.publish_exchange.clone(),
            RetryPolicy::new(config.publish_retries, config.publish_backoff),
        )
    }

    async fn publish_once(&self, notification: &Notification) -> Result<(), BrokerError> {
        let channel = self.connection.open_channel().await?;
        channel.declare_topic_exchange(&self.exchange).await?;
        channel
            .publish(&self.exchange, notification.to_message())
            .await
    }
}

#[async_trait]
impl EventProducer for BrokerProducer {
    #[instrument(skip(self), fields(exchange = %self.exchange, routing_key = %notification.routing_key()))]
    async fn publish(&self, notification: Notification) -> Result<(), DeliveryError> {
        let result = self
            .retry
            .run(|_| self.publish_once(&notification))
            .await;

        match result {
            Ok(()) => {
                info!(entity = %notification.entity, "notification published");
                Ok(())
            }
            Err(exhausted) => {
                error!(
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "notification delivery failed"
                );
                Err(DeliveryError::Exhausted {
                    routing_key: notification.routing_key(),
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error,
                })
            }
        }
    }
}

/// Stands in for a producer when no broker is reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProducer;

#[async_trait]
impl EventProducer for NoopProducer {
    async fn publish(&self, notification: Notification) -> Result<(), DeliveryError> {
        info!(
            routing_key = %notification.routing_key(),
            entity = %notification.entity,
            "event broker unavailable, notification stubbed"
        );
        Ok(())
    }
}
