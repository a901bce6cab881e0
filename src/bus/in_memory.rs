//! In-memory topic broker for tests and single-process runs.
//!
//! Behaves like a topic exchange broker as far as the directory can observe:
//! exchanges must be declared before publishing, queues receive every message
//! whose routing key matches one of their binding patterns, deliveries stay
//! unacknowledged until settled and are redelivered when their connection
//! goes away. A restart keeps durable queues and their persistent messages
//! only.
//!
//! ```
//! use agent_directory::bus::{Connector, InMemoryBroker, Message};
//!
//! # tokio_test_block_on(async {
//! let broker = InMemoryBroker::new();
//! let connection = broker.connect("memory://").await.unwrap();
//! let channel = connection.open_channel().await.unwrap();
//!
//! channel.declare_topic_exchange("topic_customers").await.unwrap();
//! channel.declare_queue("audit", true).await.unwrap();
//! channel.bind_queue("audit", "topic_customers", "#").await.unwrap();
//! channel
//!     .publish("topic_customers", Message::persistent("create.agent.emea", b"*".to_vec()))
//!     .await
//!     .unwrap();
//!
//! assert_eq!(broker.queue_depth("audit"), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::connection::{BrokerError, Channel, Connection, Connector};
use super::message::{Acknowledger, Delivery, DeliveryMode, DeliveryStream, Message};

/// How many accepted messages the publish log keeps by default.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;
use super::routing::topic_matches;

struct Pending {
    message: Message,
    redelivered: bool,
}

struct Unacked {
    message: Message,
    connection: u64,
}

struct ConsumerSlot {
    connection: u64,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct QueueState {
    durable: bool,
    ready: VecDeque<Pending>,
    unacked: BTreeMap<u64, Unacked>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
}

struct Binding {
    exchange: String,
    queue: String,
    pattern: String,
}

struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    published: VecDeque<(String, Message)>,
    log_capacity: usize,
    connections: HashMap<u64, Arc<AtomicBool>>,
}

impl BrokerState {
    fn new(log_capacity: usize) -> Self {
        Self {
            exchanges: HashSet::new(),
            queues: HashMap::new(),
            bindings: Vec::new(),
            published: VecDeque::new(),
            log_capacity,
            connections: HashMap::new(),
        }
    }

    fn record(&mut self, exchange: &str, message: &Message) {
        if self.log_capacity == 0 {
            return;
        }
        if self.published.len() == self.log_capacity {
            self.published.pop_front();
        }
        self.published
            .push_back((exchange.to_string(), message.clone()));
    }
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    next_tag: AtomicU64,
    next_connection: AtomicU64,
    reachable: AtomicBool,
    failing_connects: AtomicU32,
    failing_publishes: AtomicU32,
}

impl BrokerInner {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Hand ready messages to consumers round-robin until one side runs out.
fn dispatch(inner: &Arc<BrokerInner>, name: &str, queue: &mut QueueState) {
    while !queue.ready.is_empty() && !queue.consumers.is_empty() {
        let slot = queue.next_consumer % queue.consumers.len();
        let Some(pending) = queue.ready.pop_front() else {
            break;
        };

        let tag = inner.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        let acker: Arc<dyn Acknowledger> = Arc::new(QueueAcker {
            broker: Arc::clone(inner),
            queue: name.to_string(),
        });
        let delivery = Delivery::new(pending.message.clone(), tag, pending.redelivered, acker);

        let consumer = &queue.consumers[slot];
        let connection = consumer.connection;
        if consumer.sender.send(delivery).is_err() {
            trace!(queue = name, "consumer went away, requeueing");
            queue.consumers.remove(slot);
            queue.ready.push_front(pending);
            continue;
        }

        queue.unacked.insert(
            tag,
            Unacked {
                message: pending.message,
                connection,
            },
        );
        queue.next_consumer = slot + 1;
    }
}

/// An in-process topic broker.
///
/// Clones share the same broker. Fault injection hooks let tests exercise
/// connection retries, publish retries and degraded mode.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// A broker whose publish log keeps only the newest `capacity` messages.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::new(capacity)),
                next_tag: AtomicU64::new(0),
                next_connection: AtomicU64::new(0),
                reachable: AtomicBool::new(true),
                failing_connects: AtomicU32::new(0),
                failing_publishes: AtomicU32::new(0),
            }),
        }
    }

    /// While unreachable, connecting and opening channels fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` publishes, before they reach the exchange.
    pub fn fail_next_publishes(&self, n: u32) {
        self.inner.failing_publishes.store(n, Ordering::SeqCst);
    }

    pub fn open_connections(&self) -> usize {
        self.inner.state().connections.len()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.inner.state().exchanges.contains(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.state().queues.contains_key(name)
    }

    pub fn is_durable(&self, queue: &str) -> bool {
        self.inner
            .state()
            .queues
            .get(queue)
            .is_some_and(|q| q.durable)
    }

    /// Simulate a broker restart.
    ///
    /// Every connection is dropped and its unacked messages go back to
    /// their queues. Non-durable queues disappear with their bindings, and
    /// durable queues lose their transient messages.
    pub fn restart(&self) {
        let mut state = self.inner.state();
        for (_, closed) in state.connections.drain() {
            closed.store(true, Ordering::SeqCst);
        }

        let BrokerState {
            queues, bindings, ..
        } = &mut *state;
        queues.retain(|_, queue| queue.durable);
        bindings.retain(|b| queues.contains_key(&b.queue));
        for queue in queues.values_mut() {
            queue.consumers.clear();
            queue.next_consumer = 0;
            let unacked = std::mem::take(&mut queue.unacked);
            for (_, unacked) in unacked.into_iter().rev() {
                queue.ready.push_front(Pending {
                    message: unacked.message,
                    redelivered: true,
                });
            }
            queue
                .ready
                .retain(|p| p.message.delivery_mode == DeliveryMode::Persistent);
        }
        debug!(queues = queues.len(), "in-memory broker restarted");
    }

    /// The newest accepted messages, in publish order, up to the log capacity.
    pub fn published(&self) -> Vec<(String, Message)> {
        self.inner.state().published.iter().cloned().collect()
    }

    /// Routing keys of the logged messages, in publish order.
    pub fn published_keys(&self) -> Vec<String> {
        self.inner
            .state()
            .published
            .iter()
            .map(|(_, message)| message.routing_key.clone())
            .collect()
    }

    /// Messages waiting for a consumer.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .state()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inner
            .state()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.inner
            .state()
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }

    fn check_reachable(&self, url: &str) -> Result<(), BrokerError> {
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionFailed {
                url: url.to_string(),
                cause: "broker unreachable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Connection>, BrokerError> {
        if url.is_empty() {
            return Err(BrokerError::ConnectionFailed {
                url: String::new(),
                cause: "empty broker url".into(),
            });
        }
        self.check_reachable(url)?;
        if BrokerInner::take_fault(&self.inner.failing_connects) {
            return Err(BrokerError::ConnectionFailed {
                url: url.to_string(),
                cause: "connection refused".into(),
            });
        }

        let id = self.inner.next_connection.fetch_add(1, Ordering::SeqCst) + 1;
        let closed = Arc::new(AtomicBool::new(false));
        self.inner
            .state()
            .connections
            .insert(id, Arc::clone(&closed));
        debug!(connection = id, "in-memory broker connection opened");

        Ok(Arc::new(MemoryConnection {
            id,
            url: url.to_string(),
            broker: self.clone(),
            closed,
        }))
    }
}

struct MemoryConnection {
    id: u64,
    url: String,
    broker: InMemoryBroker,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_channel(&self) -> Result<Box<dyn Channel>, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ConnectionClosed);
        }
        self.broker.check_reachable(&self.url)?;
        Ok(Box::new(MemoryChannel {
            connection: self.id,
            broker: self.broker.clone(),
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let inner = &self.broker.inner;
        let mut state = inner.state();
        state.connections.remove(&self.id);
        for (name, queue) in state.queues.iter_mut() {
            queue.consumers.retain(|c| c.connection != self.id);

            let orphaned: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, u)| u.connection == self.id)
                .map(|(tag, _)| *tag)
                .collect();
            // Back to the head of the queue, oldest first.
            for tag in orphaned.into_iter().rev() {
                if let Some(unacked) = queue.unacked.remove(&tag) {
                    queue.ready.push_front(Pending {
                        message: unacked.message,
                        redelivered: true,
                    });
                }
            }
            dispatch(inner, name, queue);
        }
        debug!(connection = self.id, "in-memory broker connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemoryChannel {
    connection: u64,
    broker: InMemoryBroker,
    closed: Arc<AtomicBool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_topic_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.inner.state().exchanges.insert(name.to_string());
        Ok(())
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.inner.state();
        let queue = state.queues.entry(name.to_string()).or_default();
        queue.durable |= durable;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.inner.state();
        if !state.exchanges.contains(exchange) {
            return Err(BrokerError::ExchangeNotFound(exchange.to_string()));
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        let exists = state
            .bindings
            .iter()
            .any(|b| b.exchange == exchange && b.queue == queue && b.pattern == pattern);
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                pattern: pattern.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, message: Message) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let inner = &self.broker.inner;
        if BrokerInner::take_fault(&inner.failing_publishes) {
            return Err(BrokerError::PublishFailed {
                exchange: exchange.to_string(),
                routing_key: message.routing_key,
                cause: "channel reset by broker".into(),
            });
        }

        let mut state = inner.state();
        if !state.exchanges.contains(exchange) {
            return Err(BrokerError::ExchangeNotFound(exchange.to_string()));
        }

        // A queue gets one copy even when several of its bindings match.
        let mut targets: Vec<String> = Vec::new();
        for binding in &state.bindings {
            if binding.exchange == exchange
                && topic_matches(&binding.pattern, &message.routing_key)
                && !targets.contains(&binding.queue)
            {
                targets.push(binding.queue.clone());
            }
        }
        trace!(
            exchange,
            routing_key = %message.routing_key,
            queues = targets.len(),
            "routing message"
        );

        state.record(exchange, &message);
        for name in targets {
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.ready.push_back(Pending {
                    message: message.clone(),
                    redelivered: false,
                });
                dispatch(inner, &name, queue);
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;
        let inner = &self.broker.inner;
        let mut state = inner.state();
        let Some(state_queue) = state.queues.get_mut(queue) else {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        state_queue.consumers.push(ConsumerSlot {
            connection: self.connection,
            sender,
        });
        dispatch(inner, queue, state_queue);
        Ok(receiver)
    }
}

struct QueueAcker {
    broker: Arc<BrokerInner>,
    queue: String,
}

#[async_trait]
impl Acknowledger for QueueAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.broker.state();
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BrokerError::QueueNotFound(self.queue.clone()))?;
        queue
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.broker.state();
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BrokerError::QueueNotFound(self.queue.clone()))?;
        let unacked = queue
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;

        if requeue {
            queue.ready.push_front(Pending {
                message: unacked.message,
                redelivered: true,
            });
            dispatch(&self.broker, &self.queue, queue);
        } else {
            debug!(queue = %self.queue, delivery_tag, "message discarded");
        }
        Ok(())
    }
}
