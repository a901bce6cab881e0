//! Routing-key taxonomy for directory notifications.
//!
//! ```text
//! agents:    <action>.agent.<region>                 block.agent.apac
//! accounts:  <action>.account.<region>.<vip|standard> create.account.emea.vip
//! bulk:      delete.account.*.*                      payload "*"
//! ```

use std::fmt;
use std::str::FromStr;

use super::message::{EntityRef, Message, WILDCARD};
use crate::model::{Account, Agent, EntityKind, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Delete,
    Block,
    Unblock,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Delete => "delete",
            Action::Block => "block",
            Action::Unblock => "unblock",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "delete" => Ok(Action::Delete),
            "block" => Ok(Action::Block),
            "unblock" => Ok(Action::Unblock),
            _ => Err(()),
        }
    }
}

/// Region segment of a routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionScope {
    Region(Region),
    /// `*`, used by bulk operations.
    All,
}

impl fmt::Display for RegionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionScope::Region(region) => f.write_str(region.code()),
            RegionScope::All => f.write_str(WILDCARD),
        }
    }
}

impl From<Region> for RegionScope {
    fn from(region: Region) -> Self {
        RegionScope::Region(region)
    }
}

fn tier_segment(vip: Option<bool>) -> &'static str {
    match vip {
        Some(true) => "vip",
        Some(false) => "standard",
        None => WILDCARD,
    }
}

/// Build the routing key for a notification.
///
/// Account keys carry a fourth tier segment; agent keys never do.
pub fn routing_key(action: Action, kind: EntityKind, region: RegionScope, vip: Option<bool>) -> String {
    let mut key = format!("{}.{}.{}", action, kind, region);
    if kind == EntityKind::Account {
        key.push('.');
        key.push_str(tier_segment(vip));
    }
    key
}

/// Durable queue name for a binding key. Deterministic so restarts re-bind
/// the same queue.
pub fn queue_name(binding_key: &str) -> String {
    format!("{}_queue", binding_key)
}

/// Topic-exchange pattern match: `*` is exactly one segment, `#` zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    segments_match(&pattern, &key)
}

fn segments_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| segments_match(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && segments_match(rest, &key[1..]),
        Some((segment, rest)) => key.first() == Some(segment) && segments_match(rest, &key[1..]),
    }
}

/// A domain-change notification, before it becomes a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub action: Action,
    pub kind: EntityKind,
    pub entity: EntityRef,
    pub region: RegionScope,
    /// Account tier. Ignored for agents.
    pub vip: Option<bool>,
}

impl Notification {
    pub fn new(
        action: Action,
        kind: EntityKind,
        entity: EntityRef,
        region: RegionScope,
        vip: Option<bool>,
    ) -> Self {
        Self {
            action,
            kind,
            entity,
            region,
            vip,
        }
    }

    pub fn account_created(account: &Account) -> Self {
        Self::account(Action::Create, account)
    }

    pub fn account_deleted(account: &Account) -> Self {
        Self::account(Action::Delete, account)
    }

    fn account(action: Action, account: &Account) -> Self {
        Self::new(
            action,
            EntityKind::Account,
            account.id.into(),
            account.region.into(),
            Some(account.vip),
        )
    }

    pub fn agent_created(agent: &Agent, region: Region) -> Self {
        Self::agent(Action::Create, agent, region)
    }

    pub fn agent_deleted(agent: &Agent, region: Region) -> Self {
        Self::agent(Action::Delete, agent, region)
    }

    pub fn agent_blocked(agent: &Agent, region: Region) -> Self {
        Self::agent(Action::Block, agent, region)
    }

    pub fn agent_unblocked(agent: &Agent, region: Region) -> Self {
        Self::agent(Action::Unblock, agent, region)
    }

    fn agent(action: Action, agent: &Agent, region: Region) -> Self {
        Self::new(action, EntityKind::Agent, agent.id.into(), region.into(), None)
    }

    /// Bulk erase: consumers drop everything they know from this source.
    pub fn directory_cleared() -> Self {
        Self::new(
            Action::Delete,
            EntityKind::Account,
            EntityRef::All,
            RegionScope::All,
            None,
        )
    }

    pub fn routing_key(&self) -> String {
        routing_key(self.action, self.kind, self.region, self.vip)
    }

    pub fn to_message(&self) -> Message {
        Message::persistent(self.routing_key(), self.entity.encode())
    }
}

/// Leading `<action>.<kind>` of an inbound routing key.
///
/// Regional notifications carry more segments; compliance commands
/// (`block.agent`) carry none.
pub fn parse_subject(routing_key: &str) -> Option<(Action, EntityKind)> {
    let mut segments = routing_key.split('.');
    let action = segments.next()?.parse().ok()?;
    let kind = match segments.next()? {
        "account" => EntityKind::Account,
        "agent" => EntityKind::Agent,
        _ => return None,
    };
    Some((action, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewAccount;

    #[test]
    fn account_keys_carry_tier() {
        assert_eq!(
            routing_key(Action::Create, EntityKind::Account, Region::Emea.into(), Some(true)),
            "create.account.emea.vip"
        );
        assert_eq!(
            routing_key(Action::Delete, EntityKind::Account, Region::Nam.into(), Some(false)),
            "delete.account.nam.standard"
        );
    }

    #[test]
    fn agent_keys_have_three_segments() {
        for action in [Action::Create, Action::Delete, Action::Block, Action::Unblock] {
            for region in Region::ALL {
                let key = routing_key(action, EntityKind::Agent, region.into(), Some(true));
                assert_eq!(key, format!("{}.agent.{}", action, region));
            }
        }
        assert_eq!(
            routing_key(Action::Block, EntityKind::Agent, Region::Apac.into(), None),
            "block.agent.apac"
        );
    }

    #[test]
    fn bulk_clear_uses_wildcards() {
        let notification = Notification::directory_cleared();
        assert_eq!(notification.routing_key(), "delete.account.*.*");
        assert_eq!(notification.to_message().body, b"*".to_vec());
    }

    #[test]
    fn account_notification_payload_is_id() {
        let account = Account::create(NewAccount {
            name: "Acme".into(),
            email: "ops@acme.test".into(),
            region: Region::Apac,
            vip: true,
        });
        let message = Notification::account_created(&account).to_message();
        assert_eq!(message.routing_key, "create.account.apac.vip");
        assert_eq!(message.body_str(), Some(account.id.to_string().as_str()));
    }

    #[test]
    fn topic_wildcards() {
        assert!(topic_matches("block.agent", "block.agent"));
        assert!(!topic_matches("block.agent", "block.agent.emea"));
        assert!(topic_matches("block.agent.*", "block.agent.emea"));
        assert!(!topic_matches("*.agent.emea", "block.agent.apac"));
        assert!(topic_matches("create.account.emea.#", "create.account.emea.vip"));
        assert!(topic_matches("create.account.emea.#", "create.account.emea"));
        assert!(topic_matches("#", "delete.account.*.*"));
        assert!(topic_matches("*.account.*.vip", "create.account.nam.vip"));
        assert!(!topic_matches("*.account.*.vip", "create.account.nam.standard"));
        assert!(topic_matches("delete.#.standard", "delete.account.emea.standard"));
    }

    #[test]
    fn queue_names_are_deterministic() {
        assert_eq!(queue_name("block.agent"), "block.agent_queue");
        assert_eq!(queue_name("block.agent"), queue_name("block.agent"));
    }

    #[test]
    fn parses_subject() {
        assert_eq!(
            parse_subject("block.agent"),
            Some((Action::Block, EntityKind::Agent))
        );
        assert_eq!(
            parse_subject("delete.account.*.*"),
            Some((Action::Delete, EntityKind::Account))
        );
        assert_eq!(parse_subject("rename.agent.emea"), None);
    }
}
