//! Wire-level message types shared by producers, consumers and brokers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::connection::BrokerError;

/// Payload and region segment used for bulk operations.
pub const WILDCARD: &str = "*";

/// What an event payload refers to: one entity, or everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Id(Uuid),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("payload is neither an entity id nor '*': {0}")]
    Invalid(String),
}

impl EntityRef {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            EntityRef::Id(id) => Some(*id),
            EntityRef::All => None,
        }
    }

    /// UTF-8 body: the hyphenated UUID, or `*`.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn decode(body: &[u8]) -> Result<Self, PayloadError> {
        let text = std::str::from_utf8(body).map_err(|_| PayloadError::NotUtf8)?;
        let text = text.trim();
        if text == WILDCARD {
            return Ok(EntityRef::All);
        }
        Uuid::parse_str(text)
            .map(EntityRef::Id)
            .map_err(|_| PayloadError::Invalid(text.to_string()))
    }
}

impl From<Uuid> for EntityRef {
    fn from(id: Uuid) -> Self {
        EntityRef::Id(id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "{}", id),
            EntityRef::All => f.write_str(WILDCARD),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Transient,
    /// Survives a broker restart once it reaches a durable queue.
    Persistent,
}

/// A message as it travels through a topic exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub delivery_mode: DeliveryMode,
}

impl Message {
    pub fn persistent(routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
            delivery_mode: DeliveryMode::Persistent,
        }
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Settles deliveries with the broker that handed them out.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Negative acknowledgement. `requeue = true` puts the message back at the
    /// head of its queue for redelivery; `false` drops it.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}

/// A message handed to a consumer. Stays unacknowledged until settled.
pub struct Delivery {
    pub message: Message,
    pub delivery_tag: u64,
    /// Set when the broker delivered this message before without an ack.
    pub redelivered: bool,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        message: Message,
        delivery_tag: u64,
        redelivered: bool,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            message,
            delivery_tag,
            redelivered,
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Stream of deliveries for one consumer.
pub type DeliveryStream = tokio::sync::mpsc::UnboundedReceiver<Delivery>;
