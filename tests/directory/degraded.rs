use std::time::Duration;

use agent_directory::bus::InMemoryBroker;
use agent_directory::{Region, Repository};

use crate::support::{config, Harness};

#[tokio::test(start_paused = true)]
async fn unreachable_broker_degrades_instead_of_failing() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);

    let started = tokio::time::Instant::now();
    let h = Harness::start_with(config(), broker).await;
    // Two connections, two attempts each, 5s after every failure.
    assert_eq!(started.elapsed(), Duration::from_secs(20));

    assert!(!h.directory.is_publishing());
    assert!(h.directory.consumed_queues().is_empty());

    let account = h.account(Region::Emea, true).await;
    let agent = h.agent(&account).await;
    assert!(h.directory.agents().block(agent.id).await.unwrap());

    assert!(h.broker.published().is_empty());
    assert_eq!(h.accounts.get(account.id).await.unwrap(), Some(account));
    assert!(h.agents.get(agent.id).await.unwrap().unwrap().blocked);
}

#[tokio::test(start_paused = true)]
async fn slow_broker_is_waited_for() {
    let broker = InMemoryBroker::new();
    broker.fail_next_connects(1);

    let started = tokio::time::Instant::now();
    let h = Harness::start_with(config(), broker).await;
    assert_eq!(started.elapsed(), Duration::from_secs(5));

    assert!(h.directory.is_publishing());
    assert_eq!(h.directory.consumed_queues().len(), 2);
    assert_eq!(h.broker.open_connections(), 2);
}

#[tokio::test]
async fn disabled_events_still_consume_commands() {
    let mut config = config();
    config.events_enabled = false;
    let h = Harness::start_with(config, InMemoryBroker::new()).await;

    assert!(!h.directory.is_publishing());
    assert_eq!(h.directory.consumed_queues().len(), 2);
    assert_eq!(h.broker.open_connections(), 1);

    h.account(Region::Nam, false).await;
    assert!(h.published().is_empty());
    assert!(!h.broker.has_exchange("topic_customers"));

    let broker = h.broker.clone();
    h.directory.shutdown().await;
    assert_eq!(broker.open_connections(), 0);
}
