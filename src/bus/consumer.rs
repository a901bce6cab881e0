//! Inbound notifications: bind a durable queue and settle each delivery by
//! what its handler returns.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::{BrokerError, Channel, Connection};
use super::message::{Delivery, DeliveryStream, EntityRef};
use super::retry::linear_backoff;
use super::routing::queue_name;

/// A decoded inbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub routing_key: String,
    pub entity: EntityRef,
    /// The broker handed this message out before without an ack.
    pub redelivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Worth another try. The message goes back on the queue.
    #[error("transient handler failure: {0}")]
    Transient(String),

    /// Will never succeed. The message is dropped.
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// Processes one inbound notification.
///
/// Handlers must be idempotent: a message whose ack was lost is delivered
/// again.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, event: InboundEvent) -> Result<(), HandlerError>;
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(InboundEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(InboundEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: InboundEvent) -> Result<(), HandlerError> {
        (self.0)(event).await
    }
}

/// Counters for one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub acked: u64,
    pub requeued: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct StatsCounters {
    acked: AtomicU64,
    requeued: AtomicU64,
    rejected: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ConsumeStats {
        ConsumeStats {
            acked: self.acked.load(Ordering::SeqCst),
            requeued: self.requeued.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
        }
    }
}

/// Pause before taking the next delivery after consecutive transient
/// failures.
///
/// A requeued message goes straight back to the head of the queue, so
/// without a pause one failing message would spin the loop. The n-th
/// consecutive failure waits `n × base`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeueBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl RequeueBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay_after(&self, failures: u32) -> Duration {
        linear_backoff(failures, self.base).min(self.max)
    }
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// How `process` settled a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Acked,
    Requeued,
    Rejected,
}

/// Handle to a running consume loop. Dropping it stops the loop too.
pub struct Subscription {
    queue: String,
    stats: Arc<StatsCounters>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn stats(&self) -> ConsumeStats {
        self.stats.snapshot()
    }

    /// Stop consuming. Deliveries not yet settled go back to the queue when
    /// the connection closes.
    pub async fn stop(mut self) -> ConsumeStats {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(queue = %self.queue, error = %err, "consume loop ended abnormally");
        }
        self.stats.snapshot()
    }
}

/// Binds queues on a topic exchange and dispatches their messages.
///
/// Built from the result of the connection step; without a connection every
/// bind is a logged no-op.
pub struct EventConsumer {
    connection: Option<Arc<dyn Connection>>,
    exchange: String,
    requeue_backoff: RequeueBackoff,
}

impl EventConsumer {
    pub fn new(connection: Option<Arc<dyn Connection>>, exchange: impl Into<String>) -> Self {
        Self {
            connection,
            exchange: exchange.into(),
            requeue_backoff: RequeueBackoff::default(),
        }
    }

    pub fn with_requeue_backoff(mut self, backoff: RequeueBackoff) -> Self {
        self.requeue_backoff = backoff;
        self
    }

    /// A consumer that never binds anything.
    pub fn disabled(exchange: impl Into<String>) -> Self {
        Self::new(None, exchange)
    }

    /// Bind `{pattern}_queue` to the exchange with `pattern` and consume it
    /// on a background task.
    ///
    /// Each message is acked after `handler` succeeds. Transient handler
    /// failures requeue the message and slow the loop down per
    /// [`RequeueBackoff`]; rejected or undecodable messages are dropped. Returns `Ok(None)` when running without a broker.
    pub async fn bind_and_consume(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Option<Subscription>, BrokerError> {
        self.bind_queue_and_consume(&queue_name(pattern), pattern, handler)
            .await
    }

    /// Like [`bind_and_consume`](Self::bind_and_consume) with an explicit
    /// queue name, for bindings that several independent consumers share.
    pub async fn bind_queue_and_consume(
        &self,
        queue: &str,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Option<Subscription>, BrokerError> {
        let Some(connection) = &self.connection else {
            info!(pattern, "event broker unavailable, not binding");
            return Ok(None);
        };

        let queue = queue.to_string();
        let channel = connection.open_channel().await?;
        channel.declare_topic_exchange(&self.exchange).await?;
        channel.declare_queue(&queue, true).await?;
        channel.bind_queue(&queue, &self.exchange, pattern).await?;
        let deliveries = channel.consume(&queue).await?;
        info!(exchange = %self.exchange, queue = %queue, pattern, "consuming");

        let stats = Arc::new(StatsCounters::default());
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(consume_loop(
            channel,
            deliveries,
            handler,
            Arc::clone(&stats),
            queue.clone(),
            self.requeue_backoff,
            stopped,
        ));

        Ok(Some(Subscription {
            queue,
            stats,
            stop: Some(stop),
            task,
        }))
    }
}

/// The channel is held for as long as the loop runs.
async fn consume_loop(
    _channel: Box<dyn Channel>,
    mut deliveries: DeliveryStream,
    handler: Arc<dyn MessageHandler>,
    stats: Arc<StatsCounters>,
    queue: String,
    backoff: RequeueBackoff,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut failures: u32 = 0;
    loop {
        if failures > 0 {
            let delay = backoff.delay_after(failures);
            debug!(queue = %queue, failures, delay_ms = delay.as_millis() as u64, "backing off after requeue");
            tokio::select! {
                _ = &mut stopped => {
                    debug!(queue = %queue, "consume loop stopped");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tokio::select! {
            _ = &mut stopped => {
                debug!(queue = %queue, "consume loop stopped");
                break;
            }
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => {
                    match process(delivery, handler.as_ref(), &stats, &queue).await {
                        Settled::Requeued => failures = failures.saturating_add(1),
                        Settled::Acked | Settled::Rejected => failures = 0,
                    }
                }
                None => {
                    info!(queue = %queue, "delivery stream closed");
                    break;
                }
            }
        }
    }
}

async fn process(
    delivery: Delivery,
    handler: &dyn MessageHandler,
    stats: &StatsCounters,
    queue: &str,
) -> Settled {
    let routing_key = delivery.message.routing_key.clone();
    let tag = delivery.delivery_tag;

    let entity = match EntityRef::decode(&delivery.message.body) {
        Ok(entity) => entity,
        Err(err) => {
            warn!(queue, routing_key = %routing_key, error = %err, "dropping malformed message");
            settle(delivery.nack(false).await, queue, tag);
            stats.rejected.fetch_add(1, Ordering::SeqCst);
            return Settled::Rejected;
        }
    };

    let event = InboundEvent {
        routing_key: routing_key.clone(),
        entity,
        redelivered: delivery.redelivered,
    };
    debug!(queue, routing_key = %routing_key, %entity, "handling message");

    match handler.handle(event).await {
        Ok(()) => {
            settle(delivery.ack().await, queue, tag);
            stats.acked.fetch_add(1, Ordering::SeqCst);
            Settled::Acked
        }
        Err(err) if err.is_retryable() => {
            warn!(queue, routing_key = %routing_key, error = %err, "handler failed, requeueing");
            settle(delivery.nack(true).await, queue, tag);
            stats.requeued.fetch_add(1, Ordering::SeqCst);
            Settled::Requeued
        }
        Err(err) => {
            error!(queue, routing_key = %routing_key, error = %err, "handler rejected message");
            settle(delivery.nack(false).await, queue, tag);
            stats.rejected.fetch_add(1, Ordering::SeqCst);
            Settled::Rejected
        }
    }
}

fn settle(result: Result<(), BrokerError>, queue: &str, delivery_tag: u64) {
    if let Err(err) = result {
        error!(queue, delivery_tag, error = %err, "failed to settle delivery");
    }
}
