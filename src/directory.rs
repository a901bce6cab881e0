//! Process wiring: connections, producer, cache-aside repositories, services
//! and the inbound compliance consumers.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::bus::{
    BrokerProducer, ConnectionManager, ConnectionRole, ConsumeStats, Connector, EventConsumer,
    EventProducer, NoopProducer, RequeueBackoff, Subscription,
};
use crate::cache::{CacheStore, CachedRepository};
use crate::config::Config;
use crate::model::{Account, Agent};
use crate::repository::{InMemoryRepository, Repository};
use crate::service::{AccountService, AgentService, ComplianceCommand, ComplianceHandler};

/// Primary stores handed to the directory.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn Repository<Account>>,
    pub agents: Arc<dyn Repository<Agent>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            accounts: Arc::new(InMemoryRepository::<Account>::new()),
            agents: Arc::new(InMemoryRepository::<Agent>::new()),
        }
    }
}

/// A running directory.
///
/// Startup never fails because of the broker: without one, notifications are
/// stubbed and no compliance commands are consumed.
pub struct Directory {
    accounts: Arc<AccountService>,
    agents: Arc<AgentService>,
    publishing: bool,
    connections: ConnectionManager,
    subscriptions: Vec<Subscription>,
}

impl Directory {
    pub async fn start(
        config: &Config,
        connector: Arc<dyn Connector>,
        stores: Stores,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let connections = ConnectionManager::from_config(connector, &config.broker);

        let (producer, publishing): (Arc<dyn EventProducer>, bool) = if !config.events_enabled {
            info!("event publication disabled");
            (Arc::new(NoopProducer), false)
        } else {
            match connections.connect(ConnectionRole::Producer).await {
                Some(connection) => (
                    Arc::new(BrokerProducer::from_config(connection, &config.broker)),
                    true,
                ),
                None => {
                    warn!("no event broker, notifications will be stubbed");
                    (Arc::new(NoopProducer), false)
                }
            }
        };

        let accounts: Arc<dyn Repository<Account>> = Arc::new(CachedRepository::new(
            stores.accounts,
            Arc::clone(&cache),
            config.cache.ttl,
        ));
        let agents: Arc<dyn Repository<Agent>> = Arc::new(CachedRepository::new(
            stores.agents,
            cache,
            config.cache.ttl,
        ));

        let account_service = Arc::new(AccountService::new(
            Arc::clone(&accounts),
            Arc::clone(&agents),
            Arc::clone(&producer),
        ));
        let agent_service = Arc::new(AgentService::new(agents, accounts, producer));

        let consumer = EventConsumer::new(
            connections.connect(ConnectionRole::Consumer).await,
            config.broker.consume_exchange.clone(),
        )
        .with_requeue_backoff(RequeueBackoff {
            base: config.broker.requeue_backoff,
            ..RequeueBackoff::default()
        });
        let mut subscriptions = Vec::new();
        for command in ComplianceCommand::ALL {
            let handler = Arc::new(ComplianceHandler::new(command, Arc::clone(&agent_service)));
            match consumer.bind_and_consume(command.binding_key(), handler).await {
                Ok(Some(subscription)) => subscriptions.push(subscription),
                Ok(None) => {}
                Err(err) => {
                    error!(binding = command.binding_key(), error = %err, "failed to bind compliance queue");
                }
            }
        }

        info!(
            publishing,
            consuming = subscriptions.len(),
            cache_ttl_secs = config.cache.ttl.as_secs(),
            "directory started"
        );

        Self {
            accounts: account_service,
            agents: agent_service,
            publishing,
            connections,
            subscriptions,
        }
    }

    pub fn accounts(&self) -> &Arc<AccountService> {
        &self.accounts
    }

    pub fn agents(&self) -> &Arc<AgentService> {
        &self.agents
    }

    /// Whether notifications reach a broker.
    pub fn is_publishing(&self) -> bool {
        self.publishing
    }

    /// Queues the directory consumes compliance commands from.
    pub fn consumed_queues(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|s| s.queue()).collect()
    }

    pub fn consume_stats(&self) -> ConsumeStats {
        self.subscriptions
            .iter()
            .map(Subscription::stats)
            .fold(ConsumeStats::default(), |total, s| ConsumeStats {
                acked: total.acked + s.acked,
                requeued: total.requeued + s.requeued,
                rejected: total.rejected + s.rejected,
            })
    }

    /// Stop consuming and close broker connections.
    pub async fn shutdown(self) {
        for subscription in self.subscriptions {
            let queue = subscription.queue().to_string();
            let stats = subscription.stop().await;
            info!(queue = %queue, acked = stats.acked, rejected = stats.rejected, "consumer stopped");
        }
        self.connections.close().await;
        info!("directory stopped");
    }
}
