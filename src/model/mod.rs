//! Directory models - accounts, agents and the region partition.
//!
//! These are plain serde structs. Persistence goes through
//! [`Repository`](crate::repository::Repository); every model implements
//! [`Entity`](crate::repository::Entity) so the same in-memory store and
//! cache-aside decorator work for both kinds.

mod account;
mod agent;
mod region;

use std::fmt;

pub use account::{Account, AccountCriteria, AccountPatch, AccountWithAgents, NewAccount};
pub use agent::{Agent, AgentCriteria, AgentPatch, NewAgent};
pub use region::{Region, UnknownRegion};

/// The kinds of entity owned by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Account,
    Agent,
}

impl EntityKind {
    /// Routing-key segment (`account`, `agent`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Agent => "agent",
        }
    }

    /// Cache namespace (`Account`, `Agent`).
    pub fn cache_namespace(&self) -> &'static str {
        match self {
            EntityKind::Account => "Account",
            EntityKind::Agent => "Agent",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
