use std::sync::Arc;

use agent_directory::bus::{Connector, EventConsumer, Subscription};
use agent_directory::{Region, RegionalProjection, RegionalView, VipProjection, VipView};

use crate::support::{eventually, Harness};

async fn subscribe(h: &Harness, region: Region) -> (Arc<RegionalProjection>, Vec<Subscription>) {
    let connection = h
        .broker
        .connect(&format!("memory://billing-{}", region))
        .await
        .unwrap();
    let consumer = EventConsumer::new(Some(connection), "topic_customers");
    let projection = Arc::new(RegionalProjection::new(region));
    let subscriptions = Arc::clone(&projection).subscribe(&consumer).await.unwrap();
    (projection, subscriptions)
}

#[tokio::test]
async fn each_region_sees_only_its_own_notifications() {
    let h = Harness::start().await;
    let (emea, _emea_subs) = subscribe(&h, Region::Emea).await;
    let (nam, nam_subs) = subscribe(&h, Region::Nam).await;
    assert_eq!(nam_subs.len(), 7);

    let european = h.account(Region::Emea, true).await;
    let american = h.account(Region::Nam, false).await;
    let agent = h.agent(&american).await;
    h.directory.agents().block(agent.id).await.unwrap();

    eventually("nam projection caught up", || {
        let view = nam.snapshot();
        let done = view.is_blocked(agent.id)
            && view.created_agents.contains(&agent.id)
            && view.created_accounts.contains(&american.id);
        async move { done }
    })
    .await;
    eventually("emea projection caught up", || {
        let done = emea.snapshot().created_accounts.len() == 1;
        async move { done }
    })
    .await;

    assert_eq!(nam.snapshot().created_accounts.len(), 1);

    let view = emea.snapshot();
    assert!(view.created_accounts.contains(&european.id));
    assert!(view.created_agents.is_empty());
    assert!(view.blocked_agents.is_empty());

    h.directory.accounts().delete(american.id).await.unwrap();
    eventually("account delete projected", || {
        let view = nam.snapshot();
        let done =
            view.deleted_accounts.contains(&american.id) && view.deleted_agents.contains(&agent.id);
        async move { done }
    })
    .await;
    assert!(!nam.snapshot().is_blocked(agent.id));
}

#[tokio::test]
async fn bulk_clear_reaches_every_region() {
    let h = Harness::start().await;
    let (emea, _emea_subs) = subscribe(&h, Region::Emea).await;
    let (apac, _apac_subs) = subscribe(&h, Region::Apac).await;

    h.account(Region::Emea, false).await;
    h.account(Region::Apac, true).await;
    eventually("accounts projected", || {
        let done = emea.snapshot().created_accounts.len() == 1
            && apac.snapshot().created_accounts.len() == 1;
        async move { done }
    })
    .await;

    h.directory.accounts().delete_all().await.unwrap();
    eventually("views dropped", || {
        let done =
            emea.snapshot() == RegionalView::default() && apac.snapshot() == RegionalView::default();
        async move { done }
    })
    .await;
    assert_eq!(h.broker.queue_depth("emea.delete.account.*.*_queue"), 0);
    assert_eq!(h.broker.queue_depth("apac.delete.account.*.*_queue"), 0);
}

#[tokio::test]
async fn vip_tier_is_projected_across_regions() {
    let h = Harness::start().await;
    let connection = h.broker.connect("memory://vip-customers").await.unwrap();
    let consumer = EventConsumer::new(Some(connection), "topic_customers");
    let vip = Arc::new(VipProjection::new());
    let subscriptions = Arc::clone(&vip).subscribe(&consumer).await.unwrap();
    assert_eq!(subscriptions.len(), 3);

    let european = h.account(Region::Emea, true).await;
    let american = h.account(Region::Nam, true).await;
    let standard = h.account(Region::Apac, false).await;
    h.directory.accounts().delete(american.id).await.unwrap();
    h.directory.accounts().delete(standard.id).await.unwrap();

    eventually("vip notifications projected", || {
        let view = vip.snapshot();
        let done = view.created_accounts.len() == 2 && view.deleted_accounts.len() == 1;
        async move { done }
    })
    .await;
    eventually("standard delete skipped", || {
        let settled = h.broker.queue_depth("vip.delete.account.*.*_queue") == 0
            && h.broker.unacked_count("vip.delete.account.*.*_queue") == 0;
        async move { settled }
    })
    .await;

    let view = vip.snapshot();
    assert!(view.created_accounts.contains(&european.id));
    assert!(view.created_accounts.contains(&american.id));
    assert!(!view.created_accounts.contains(&standard.id));
    assert!(view.deleted_accounts.contains(&american.id));
    assert!(!view.deleted_accounts.contains(&standard.id));

    h.directory.accounts().delete_all().await.unwrap();
    eventually("vip view dropped", || {
        let done = vip.snapshot() == VipView::default();
        async move { done }
    })
    .await;
}
