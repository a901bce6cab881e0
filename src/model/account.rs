use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Agent, EntityKind, Region};
use crate::repository::Entity;

/// A customer account. Owns zero or more agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub region: Region,
    pub vip: bool,
}

impl Account {
    /// Build a new account with a freshly assigned id.
    pub fn create(input: NewAccount) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: input.name,
            email: input.email,
            region: input.region,
            vip: input.vip,
        }
    }
}

/// Input for creating an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub region: Region,
    pub vip: bool,
}

/// Partial update of an account. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub region: Option<Region>,
    pub vip: Option<bool>,
}

/// Filters understood by account repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountCriteria {
    Email(String),
    Region(Region),
    Vip(bool),
}

/// An account together with the agents it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountWithAgents {
    #[serde(flatten)]
    pub account: Account,
    pub agents: Vec<Agent>,
}

impl Entity for Account {
    const KIND: EntityKind = EntityKind::Account;
    type Patch = AccountPatch;
    type Criteria = AccountCriteria;

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_email(&self) -> &str {
        &self.email
    }

    fn apply(&mut self, patch: &AccountPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
        if let Some(region) = patch.region {
            self.region = region;
        }
        if let Some(vip) = patch.vip {
            self.vip = vip;
        }
    }

    fn matches(&self, criteria: &AccountCriteria) -> bool {
        match criteria {
            AccountCriteria::Email(email) => self.email.eq_ignore_ascii_case(email),
            AccountCriteria::Region(region) => self.region == *region,
            AccountCriteria::Vip(vip) => self.vip == *vip,
        }
    }
}
