//! Event bus - directory notifications over a topic exchange.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ConnectionManager                                           │
//! │  - bounded connect retries, None when the broker is down     │
//! └──────────────────────────────────────────────────────────────┘
//!              │ Option<Arc<dyn Connection>>
//!      ┌───────┴──────────────────────┐
//!      ▼                              ▼
//! ┌──────────────────────┐   ┌──────────────────────────────────┐
//! │ BrokerProducer       │   │ EventConsumer                    │
//! │ NoopProducer (None)  │   │ bind_and_consume(pattern, h)     │
//! │ publish + retry      │   │ ack / nack(requeue), backoff     │
//! └──────────────────────┘   └──────────────────────────────────┘
//!      │                              ▲
//!      ▼                              │
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Connector / Connection / Channel traits                     │
//! └──────────────────────────────────────────────────────────────┘
//!          │                                  │
//!          ▼                                  ▼
//! ┌────────────────┐                ┌──────────────────────────┐
//! │ InMemoryBroker │                │ AMQP client (external)   │
//! │  (included)    │                │                          │
//! └────────────────┘                └──────────────────────────┘
//! ```
//!
//! Payloads are the entity id as UTF-8 text, or `*` for bulk operations.

mod connection;
mod consumer;
mod in_memory;
mod message;
mod producer;
mod retry;
mod routing;

pub use connection::{
    connect, BrokerError, Channel, Connection, ConnectionManager, ConnectionRole, Connector,
};
pub use consumer::{
    handler_fn, ConsumeStats, EventConsumer, HandlerError, HandlerFn, InboundEvent,
    MessageHandler, RequeueBackoff, Subscription,
};
pub use in_memory::InMemoryBroker;
pub use message::{
    Acknowledger, Delivery, DeliveryMode, DeliveryStream, EntityRef, Message, PayloadError,
    WILDCARD,
};
pub use producer::{BrokerProducer, DeliveryError, EventProducer, NoopProducer};
pub use retry::{constant_backoff, linear_backoff, BackoffFn, RetryExhausted, RetryPolicy};
pub use routing::{
    parse_subject, queue_name, routing_key, topic_matches, Action, Notification, RegionScope,
};
