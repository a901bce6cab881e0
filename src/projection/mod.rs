//! Regional projection - what a downstream service in one region knows.
//!
//! Billing and VIP-handling services never read the directory's store. They
//! subscribe to the notifications for their region and keep their own view:
//!
//! ```text
//! create.account.<region>.*  ─┐
//! delete.account.<region>.*   │
//! create.agent.<region>       ├──► RegionalProjection ──► RegionalView
//! delete.agent.<region>       │
//! block.agent.<region>        │
//! unblock.agent.<region>      │
//! delete.account.*.*         ─┘   (drop everything)
//! ```
//!
//! Every update is a set operation, so redelivered messages change nothing.
//! [`VipProjection`] does the same for the VIP tier across all regions.

mod vip;

pub use vip::{VipProjection, VipView};

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::{
    parse_subject, queue_name, routing_key, Action, BrokerError, EntityRef, EventConsumer,
    HandlerError, InboundEvent, MessageHandler, RegionScope, Subscription,
};
use crate::model::{EntityKind, Region};

/// Point-in-time copy of a projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionalView {
    pub created_accounts: BTreeSet<Uuid>,
    pub deleted_accounts: BTreeSet<Uuid>,
    pub created_agents: BTreeSet<Uuid>,
    pub deleted_agents: BTreeSet<Uuid>,
    pub blocked_agents: BTreeSet<Uuid>,
}

impl RegionalView {
    fn apply(&mut self, action: Action, kind: EntityKind, id: Uuid) {
        match (kind, action) {
            (EntityKind::Account, Action::Create) => {
                self.created_accounts.insert(id);
            }
            (EntityKind::Account, Action::Delete) => {
                self.deleted_accounts.insert(id);
            }
            (EntityKind::Agent, Action::Create) => {
                self.created_agents.insert(id);
            }
            (EntityKind::Agent, Action::Delete) => {
                self.deleted_agents.insert(id);
                self.blocked_agents.remove(&id);
            }
            (EntityKind::Agent, Action::Block) => {
                self.blocked_agents.insert(id);
            }
            (EntityKind::Agent, Action::Unblock) => {
                self.blocked_agents.remove(&id);
            }
            (EntityKind::Account, Action::Block | Action::Unblock) => {}
        }
    }

    pub fn is_blocked(&self, agent_id: Uuid) -> bool {
        self.blocked_agents.contains(&agent_id)
    }
}

/// Downstream view of one region, fed by directory notifications.
pub struct RegionalProjection {
    region: Region,
    view: RwLock<RegionalView>,
}

impl RegionalProjection {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            view: RwLock::new(RegionalView::default()),
        }
    }

    /// Binding keys for this region's notifications. The bulk clear binding
    /// is not included; see [`bulk_binding`](Self::bulk_binding).
    pub fn bindings(&self) -> Vec<String> {
        let region = RegionScope::Region(self.region);
        let mut keys = Vec::new();
        for action in [Action::Create, Action::Delete] {
            // No tier renders as `*`, matching both tiers.
            keys.push(routing_key(action, EntityKind::Account, region, None));
        }
        for action in [Action::Create, Action::Delete, Action::Block, Action::Unblock] {
            keys.push(routing_key(action, EntityKind::Agent, region, None));
        }
        keys
    }

    /// Binding for the bulk clear (`delete.account.*.*`) and the queue this
    /// region consumes it from. Every region needs its own copy of the
    /// message, so the queue name carries the region.
    pub fn bulk_binding(&self) -> (String, String) {
        let pattern = routing_key(Action::Delete, EntityKind::Account, RegionScope::All, None);
        let queue = format!("{}.{}", self.region, queue_name(&pattern));
        (pattern, queue)
    }

    /// Bind every regional pattern plus the bulk clear on `consumer`.
    ///
    /// Returns no subscriptions when the consumer has no broker.
    pub async fn subscribe(
        self: Arc<Self>,
        consumer: &EventConsumer,
    ) -> Result<Vec<Subscription>, BrokerError> {
        let mut subscriptions = Vec::new();
        for pattern in self.bindings() {
            if let Some(subscription) = consumer
                .bind_and_consume(&pattern, Arc::clone(&self) as Arc<dyn MessageHandler>)
                .await?
            {
                subscriptions.push(subscription);
            }
        }

        let (pattern, queue) = self.bulk_binding();
        if let Some(subscription) = consumer
            .bind_queue_and_consume(&queue, &pattern, Arc::clone(&self) as Arc<dyn MessageHandler>)
            .await?
        {
            subscriptions.push(subscription);
        }
        info!(region = %self.region, queues = subscriptions.len(), "regional projection subscribed");
        Ok(subscriptions)
    }

    pub fn snapshot(&self) -> RegionalView {
        match self.view.read() {
            Ok(view) => view.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn owns(&self, routing_key: &str) -> bool {
        match routing_key.split('.').nth(2) {
            Some(segment) => segment == self.region.code(),
            None => true,
        }
    }

    fn update(&self, f: impl FnOnce(&mut RegionalView)) -> Result<(), HandlerError> {
        let mut view = self
            .view
            .write()
            .map_err(|_| HandlerError::Transient("projection lock poisoned".into()))?;
        f(&mut *view);
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for RegionalProjection {
    async fn handle(&self, event: InboundEvent) -> Result<(), HandlerError> {
        let (action, kind) = parse_subject(&event.routing_key).ok_or_else(|| {
            HandlerError::Rejected(format!("unexpected routing key {}", event.routing_key))
        })?;

        match event.entity {
            EntityRef::All if action == Action::Delete => {
                info!(region = %self.region, "directory cleared upstream, dropping view");
                self.update(|view| *view = RegionalView::default())
            }
            EntityRef::All => Err(HandlerError::Rejected(format!(
                "wildcard payload on {}",
                event.routing_key
            ))),
            // The bulk binding also matches other regions' account deletes.
            EntityRef::Id(id) if !self.owns(&event.routing_key) => {
                debug!(region = %self.region, routing_key = %event.routing_key, %id, "not our region, skipping");
                Ok(())
            }
            EntityRef::Id(id) => {
                debug!(region = %self.region, %action, %kind, %id, "projecting");
                self.update(|view| view.apply(action, kind, id))
            }
        }
    }
}
