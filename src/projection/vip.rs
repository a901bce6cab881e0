//! VIP tier projection, the view of a service that handles VIP customers in
//! every region.
//!
//! ```text
//! create.account.*.vip  ─┐
//! delete.account.*.vip   ├──► VipProjection ──► VipView
//! delete.account.*.*    ─┘   (drop everything, skip standard deletes)
//! ```

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
use crate::model::EntityKind;

const VIP_TIER: &str = "vip";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VipView {
    pub created_accounts: BTreeSet<Uuid>,
    pub deleted_accounts: BTreeSet<Uuid>,
}

/// Downstream view of VIP accounts across all regions.
#[derive(Default)]
pub struct VipProjection {
    view: RwLock<VipView>,
}

impl VipProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// `create.account.*.vip` and `delete.account.*.vip`.
    pub fn bindings(&self) -> Vec<String> {
        [Action::Create, Action::Delete]
            .into_iter()
            .map(|action| routing_key(action, EntityKind::Account, RegionScope::All, Some(true)))
            .collect()
    }

    /// Bulk clear pattern and the queue the VIP service reads it from.
    pub fn bulk_binding(&self) -> (String, String) {
        let pattern = routing_key(Action::Delete, EntityKind::Account, RegionScope::All, None);
        let queue = format!("{}.{}", VIP_TIER, queue_name(&pattern));
        (pattern, queue)
    }

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
        info!(queues = subscriptions.len(), "vip projection subscribed");
        Ok(subscriptions)
    }

    pub fn snapshot(&self) -> VipView {
        match self.view.read() {
            Ok(view) => view.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut VipView)) -> Result<(), HandlerError> {
        let mut view = self
            .view
            .write()
            .map_err(|_| HandlerError::Transient("projection lock poisoned".into()))?;
        f(&mut *view);
        Ok(())
    }
}

fn is_vip(routing_key: &str) -> bool {
    routing_key.split('.').nth(3) == Some(VIP_TIER)
}

#[async_trait]
impl MessageHandler for VipProjection {
    async fn handle(&self, event: InboundEvent) -> Result<(), HandlerError> {
        let action = match parse_subject(&event.routing_key) {
            Some((action @ (Action::Create | Action::Delete), EntityKind::Account)) => action,
            _ => {
                return Err(HandlerError::Rejected(format!(
                    "unexpected routing key {}",
                    event.routing_key
                )))
            }
        };

        match event.entity {
            EntityRef::All if action == Action::Delete => {
                info!("directory cleared upstream, dropping vip view");
                self.update(|view| *view = VipView::default())
            }
            EntityRef::All => Err(HandlerError::Rejected(format!(
                "wildcard payload on {}",
                event.routing_key
            ))),
            // The bulk binding also matches standard account deletes.
            EntityRef::Id(id) if !is_vip(&event.routing_key) => {
                debug!(routing_key = %event.routing_key, %id, "standard tier, skipping");
                Ok(())
            }
            EntityRef::Id(id) => {
                debug!(%action, %id, "projecting vip account");
                self.update(|view| {
                    if action == Action::Create {
                        view.created_accounts.insert(id);
                    } else {
                        view.deleted_accounts.insert(id);
                    }
                })
            }
        }
    }
}
