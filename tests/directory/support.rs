//! Test harness: a directory wired to in-memory broker, cache and stores.

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use agent_directory::bus::{Connector, InMemoryBroker, Message};
use agent_directory::{
    Account, Agent, Config, Directory, InMemoryCache, InMemoryRepository, NewAccount, NewAgent,
    Region, Stores,
};
use uuid::Uuid;

static LOGGING: Once = Once::new();

pub fn init_logging() {
    LOGGING.call_once(|| {
        agent_directory::logging::init_for_tests();
    });
}

pub const TTL: Duration = Duration::from_secs(60);

pub fn config() -> Config {
    let mut config = Config::default();
    config.broker.url = "memory://directory".into();
    config.broker.connect_retries = 2;
    config.broker.connect_timeout = Duration::from_secs(5);
    config.broker.publish_retries = 3;
    config.broker.publish_backoff = Duration::from_secs(1);
    config.cache.ttl = TTL;
    config
}

pub struct Harness {
    pub directory: Directory,
    pub broker: InMemoryBroker,
    pub cache: InMemoryCache,
    pub accounts: InMemoryRepository<Account>,
    pub agents: InMemoryRepository<Agent>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(config(), InMemoryBroker::new()).await
    }

    pub async fn start_with(config: Config, broker: InMemoryBroker) -> Self {
        init_logging();
        let cache = InMemoryCache::new();
        let accounts = InMemoryRepository::<Account>::new();
        let agents = InMemoryRepository::<Agent>::new();
        let stores = Stores {
            accounts: Arc::new(accounts.clone()),
            agents: Arc::new(agents.clone()),
        };

        let directory = Directory::start(
            &config,
            Arc::new(broker.clone()),
            stores,
            Arc::new(cache.clone()),
        )
        .await;

        Self {
            directory,
            broker,
            cache,
            accounts,
            agents,
        }
    }

    pub async fn account(&self, region: Region, vip: bool) -> Account {
        self.directory
            .accounts()
            .create(NewAccount {
                name: format!("{} customer", region),
                email: format!("{}@customer.test", Uuid::new_v4()),
                region,
                vip,
            })
            .await
            .unwrap()
    }

    pub async fn agent(&self, account: &Account) -> Agent {
        self.directory
            .agents()
            .create_agent(
                account.id,
                NewAgent {
                    name: "Agent".into(),
                    email: format!("{}@agents.test", Uuid::new_v4()),
                },
            )
            .await
            .unwrap()
    }

    /// Routing keys published on the outbound exchange so far.
    pub fn published(&self) -> Vec<String> {
        self.broker
            .published()
            .into_iter()
            .filter(|(exchange, _)| exchange == "topic_customers")
            .map(|(_, message)| message.routing_key)
            .collect()
    }

    /// Send a compliance command the way the compliance service does.
    pub async fn send_command(&self, routing_key: &str, body: &[u8]) {
        publish(&self.broker, "topic_compliance", routing_key, body).await;
    }
}

pub async fn publish(broker: &InMemoryBroker, exchange: &str, routing_key: &str, body: &[u8]) {
    let connection = broker.connect("memory://test-client").await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    channel.declare_topic_exchange(exchange).await.unwrap();
    channel
        .publish(exchange, Message::persistent(routing_key, body.to_vec()))
        .await
        .unwrap();
    connection.close().await.unwrap();
}

/// Poll `check` until it holds, panicking after a generous number of tries.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}
