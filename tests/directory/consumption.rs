use std::sync::{Arc, Mutex};

use agent_directory::bus::{
    handler_fn, Connector, EntityRef, EventConsumer, HandlerError, InMemoryBroker, InboundEvent,
    MessageHandler,
};
use agent_directory::{Region, Repository};
use uuid::Uuid;

use crate::support::{eventually, publish, Harness};

#[tokio::test]
async fn block_command_is_applied_and_republished() {
    let h = Harness::start().await;
    assert_eq!(
        h.directory.consumed_queues(),
        vec!["block.agent_queue", "unblock.agent_queue"]
    );
    let account = h.account(Region::Apac, false).await;
    let agent = h.agent(&account).await;

    // Delivered twice, as after a lost ack.
    h.send_command("block.agent", agent.id.to_string().as_bytes()).await;
    h.send_command("block.agent", agent.id.to_string().as_bytes()).await;
    eventually("both commands acked", || {
        let acked = h.directory.consume_stats().acked;
        async move { acked == 2 }
    })
    .await;

    assert!(h.agents.get(agent.id).await.unwrap().unwrap().blocked);
    let blocks = h
        .published()
        .into_iter()
        .filter(|key| key == "block.agent.apac")
        .count();
    assert_eq!(blocks, 2);
    assert_eq!(h.broker.unacked_count("block.agent_queue"), 0);

    h.send_command("unblock.agent", agent.id.to_string().as_bytes()).await;
    eventually("unblock acked", || {
        let acked = h.directory.consume_stats().acked;
        async move { acked == 3 }
    })
    .await;
    assert!(!h.agents.get(agent.id).await.unwrap().unwrap().blocked);
}

#[tokio::test]
async fn unknown_agent_is_acked_without_side_effects() {
    let h = Harness::start().await;
    h.send_command("block.agent", Uuid::new_v4().to_string().as_bytes())
        .await;

    eventually("command acked", || {
        let acked = h.directory.consume_stats().acked;
        async move { acked == 1 }
    })
    .await;
    assert!(h.published().is_empty());
}

#[tokio::test]
async fn malformed_command_is_dropped() {
    let h = Harness::start().await;
    h.send_command("block.agent", b"agent-42").await;
    h.send_command("unblock.agent", b"*").await;

    eventually("commands rejected", || {
        let rejected = h.directory.consume_stats().rejected;
        async move { rejected == 2 }
    })
    .await;
    assert_eq!(h.broker.queue_depth("block.agent_queue"), 0);
    assert_eq!(h.broker.queue_depth("unblock.agent_queue"), 0);
}

#[tokio::test]
async fn shutdown_stops_consuming() {
    let h = Harness::start().await;
    let broker = h.broker.clone();
    h.directory.shutdown().await;
    assert_eq!(broker.open_connections(), 0);

    publish(&broker, "topic_compliance", "block.agent", Uuid::new_v4().to_string().as_bytes())
        .await;
    // Durable queue keeps the command for the next consumer.
    assert_eq!(broker.queue_depth("block.agent_queue"), 1);
}

fn recorder() -> (
    Arc<Mutex<Vec<(EntityRef, bool)>>>,
    Arc<dyn MessageHandler>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |event: InboundEvent| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push((event.entity, event.redelivered));
            Ok::<(), HandlerError>(())
        }
    });
    (seen, Arc::new(handler))
}

#[tokio::test]
async fn same_key_is_delivered_in_order() {
    let broker = InMemoryBroker::new();
    let connection = broker.connect("memory://consumer").await.unwrap();
    let consumer = EventConsumer::new(Some(connection), "topic_compliance");
    let (seen, handler) = recorder();
    let _subscription = consumer
        .bind_and_consume("block.agent", handler)
        .await
        .unwrap()
        .unwrap();

    let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    let total = ids.len();
    for id in &ids {
        publish(&broker, "topic_compliance", "block.agent", id.to_string().as_bytes()).await;
    }

    eventually("all handled", || {
        let done = seen.lock().unwrap().len() == total;
        async move { done }
    })
    .await;
    let order: Vec<EntityRef> = seen.lock().unwrap().iter().map(|(e, _)| *e).collect();
    let expected: Vec<EntityRef> = ids.iter().copied().map(EntityRef::from).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn crash_before_ack_redelivers() {
    let broker = InMemoryBroker::new();

    // A consumer takes both messages and dies before acknowledging.
    let crashed = broker.connect("memory://crashed").await.unwrap();
    let channel = crashed.open_channel().await.unwrap();
    channel.declare_topic_exchange("topic_compliance").await.unwrap();
    channel.declare_queue("block.agent_queue", true).await.unwrap();
    channel
        .bind_queue("block.agent_queue", "topic_compliance", "block.agent")
        .await
        .unwrap();
    let mut deliveries = channel.consume("block.agent_queue").await.unwrap();

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    publish(&broker, "topic_compliance", "block.agent", first.to_string().as_bytes()).await;
    publish(&broker, "topic_compliance", "block.agent", second.to_string().as_bytes()).await;
    let taken = deliveries.recv().await.unwrap();
    assert!(!taken.redelivered);
    assert_eq!(broker.unacked_count("block.agent_queue"), 2);

    crashed.close().await.unwrap();
    assert_eq!(broker.queue_depth("block.agent_queue"), 2);

    // Restarted consumer gets both again, in order, flagged as redelivered.
    let connection = broker.connect("memory://restarted").await.unwrap();
    let consumer = EventConsumer::new(Some(connection), "topic_compliance");
    let (seen, handler) = recorder();
    let subscription = consumer
        .bind_and_consume("block.agent", handler)
        .await
        .unwrap()
        .unwrap();

    eventually("redelivered", || {
        let done = seen.lock().unwrap().len() == 2;
        async move { done }
    })
    .await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(EntityRef::Id(first), true), (EntityRef::Id(second), true)]
    );
    assert_eq!(subscription.stop().await.acked, 2);
    assert_eq!(broker.unacked_count("block.agent_queue"), 0);
}
