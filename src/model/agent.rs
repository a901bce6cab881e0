use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntityKind;
use crate::repository::Entity;

/// An agent acting on behalf of exactly one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub blocked: bool,
    pub account_id: Uuid,
}

impl Agent {
    /// Build a new, unblocked agent with a freshly assigned id.
    pub fn create(input: NewAgent, account_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: input.name,
            email: input.email,
            blocked: false,
            account_id,
        }
    }
}

/// Input for creating an agent under an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub email: String,
}

/// Partial update of an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub blocked: Option<bool>,
}

impl AgentPatch {
    pub fn blocked(blocked: bool) -> Self {
        Self {
            blocked: Some(blocked),
            ..Default::default()
        }
    }
}

/// Filters understood by agent repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCriteria {
    Email(String),
    Account(Uuid),
    Blocked(bool),
}

impl Entity for Agent {
    const KIND: EntityKind = EntityKind::Agent;
    type Patch = AgentPatch;
    type Criteria = AgentCriteria;

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_email(&self) -> &str {
        &self.email
    }

    fn apply(&mut self, patch: &AgentPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
        if let Some(blocked) = patch.blocked {
            self.blocked = blocked;
        }
    }

    fn matches(&self, criteria: &AgentCriteria) -> bool {
        match criteria {
            AgentCriteria::Email(email) => self.email.eq_ignore_ascii_case(email),
            AgentCriteria::Account(account_id) => self.account_id == *account_id,
            AgentCriteria::Blocked(blocked) => self.blocked == *blocked,
        }
    }
}
