use std::time::Duration;

use agent_directory::bus::EntityRef;
use agent_directory::{Region, Repository};

use crate::support::Harness;

#[tokio::test]
async fn routing_keys_follow_region_and_tier() {
    let h = Harness::start().await;

    let vip = h.account(Region::Emea, true).await;
    let standard = h.account(Region::Nam, false).await;
    let agent = h.agent(&standard).await;
    h.directory.agents().block(agent.id).await.unwrap();
    h.directory.agents().unblock(agent.id).await.unwrap();

    assert_eq!(
        h.published(),
        vec![
            "create.account.emea.vip",
            "create.account.nam.standard",
            "create.agent.nam",
            "block.agent.nam",
            "unblock.agent.nam",
        ]
    );

    let (_, first) = &h.broker.published()[0];
    assert_eq!(first.body_str(), Some(vip.id.to_string().as_str()));
}

#[tokio::test]
async fn account_delete_fans_out_agent_deletes_in_account_region() {
    let h = Harness::start().await;
    let account = h.account(Region::Apac, true).await;
    let agents = [h.agent(&account).await, h.agent(&account).await];

    h.directory.accounts().delete(account.id).await.unwrap();

    let published = h.broker.published();
    let tail: Vec<_> = published[published.len() - 3..]
        .iter()
        .map(|(_, m)| (m.routing_key.clone(), EntityRef::decode(&m.body).unwrap()))
        .collect();
    assert_eq!(
        tail[0],
        ("delete.account.apac.vip".to_string(), EntityRef::from(account.id))
    );
    for (key, entity) in &tail[1..] {
        assert_eq!(key, "delete.agent.apac");
        assert!(agents.iter().any(|a| EntityRef::from(a.id) == *entity));
    }
    assert!(h.agents.is_empty());
}

#[tokio::test]
async fn bulk_clear_publishes_wildcards() {
    let h = Harness::start().await;
    h.account(Region::Emea, false).await;
    h.account(Region::Nam, true).await;

    assert_eq!(h.directory.accounts().delete_all().await.unwrap(), 2);

    let published = h.broker.published();
    let (_, last) = published.last().unwrap();
    assert_eq!(last.routing_key, "delete.account.*.*");
    assert_eq!(last.body_str(), Some("*"));
    assert!(h.accounts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_keeps_the_mutation() {
    let h = Harness::start().await;
    h.broker.fail_next_publishes(3);

    let started = tokio::time::Instant::now();
    let account = h.account(Region::Emea, false).await;
    // 1s after the first failure, 2s after the second, none after the last.
    assert_eq!(started.elapsed(), Duration::from_secs(3));

    assert!(h.published().is_empty());
    assert_eq!(h.accounts.get(account.id).await.unwrap(), Some(account));
}

#[tokio::test(start_paused = true)]
async fn transient_publish_failure_is_retried() {
    let h = Harness::start().await;
    h.broker.fail_next_publishes(1);

    let started = tokio::time::Instant::now();
    h.account(Region::Nam, true).await;
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(h.published(), vec!["create.account.nam.vip"]);
}
