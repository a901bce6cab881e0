//! Entity services - the only way accounts and agents change.
//!
//! Every mutation commits to the primary store first and then publishes a
//! notification. Publishing is best effort: a [`DeliveryError`] is logged and
//! the committed change stands.
//!
//! ```ignore
//! let accounts = AccountService::new(account_repo, agent_repo, producer);
//! let account = accounts.create(NewAccount { .. }).await?;   // create.account.emea.vip
//! accounts.delete(account.id).await?;                         // delete.account.emea.vip
//!                                                             // + delete.agent.emea per agent
//! ```
//!
//! [`DeliveryError`]: crate::bus::DeliveryError

mod account;
mod agent;
mod handlers;

use tracing::error;

use crate::bus::{EventProducer, Notification};

pub use account::AccountService;
pub use agent::AgentService;
pub use handlers::{ComplianceCommand, ComplianceHandler};

/// Publish after a committed mutation. Delivery failures are logged only.
pub(crate) async fn notify(producer: &dyn EventProducer, notification: Notification) {
    if let Err(err) = producer.publish(notification).await {
        error!(
            routing_key = %notification.routing_key(),
            entity = %notification.entity,
            error = %err,
            "change committed but notification was not delivered"
        );
    }
}
