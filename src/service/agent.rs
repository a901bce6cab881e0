use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::notify;
use crate::bus::{EventProducer, Notification};
use crate::error::{ServiceError, ServiceResult};
use crate::model::{Account, Agent, AgentCriteria, AgentPatch, EntityKind, NewAgent, Region};
use crate::repository::Repository;

/// Agent reads, lifecycle and compliance state.
pub struct AgentService {
    agents: Arc<dyn Repository<Agent>>,
    accounts: Arc<dyn Repository<Account>>,
    producer: Arc<dyn EventProducer>,
}

impl AgentService {
    pub fn new(
        agents: Arc<dyn Repository<Agent>>,
        accounts: Arc<dyn Repository<Account>>,
        producer: Arc<dyn EventProducer>,
    ) -> Self {
        Self {
            agents,
            accounts,
            producer,
        }
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Agent> {
        self.agents
            .get(id)
            .await?
            .ok_or(ServiceError::not_found(EntityKind::Agent, id))
    }

    pub async fn get_all(&self) -> ServiceResult<Vec<Agent>> {
        Ok(self.agents.get_all().await?)
    }

    pub async fn get_by_email(&self, email: &str) -> ServiceResult<Option<Agent>> {
        let mut found = self
            .agents
            .get_by(&AgentCriteria::Email(email.to_string()))
            .await?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    pub async fn get_for_account(&self, account_id: Uuid) -> ServiceResult<Vec<Agent>> {
        Ok(self.agents.get_by(&AgentCriteria::Account(account_id)).await?)
    }

    /// Create an agent under an existing account and announce it on
    /// `create.agent.<region>`.
    pub async fn create_agent(&self, account_id: Uuid, input: NewAgent) -> ServiceResult<Agent> {
        let account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or(ServiceError::not_found(EntityKind::Account, account_id))?;

        if self.get_by_email(&input.email).await?.is_some() {
            return Err(ServiceError::DuplicateEmail(input.email));
        }

        let agent = self.agents.create(Agent::create(input, account_id)).await?;
        info!(agent_id = %agent.id, %account_id, "agent created");

        notify(
            self.producer.as_ref(),
            Notification::agent_created(&agent, account.region),
        )
        .await;
        Ok(agent)
    }

    /// Remove an agent from its account.
    ///
    /// A missing agent is a no-op. An agent owned by another account (or an
    /// unknown account) is an inconsistency and nothing is deleted.
    pub async fn delete_agent(&self, account_id: Uuid, agent_id: Uuid) -> ServiceResult<()> {
        let Some(agent) = self.agents.get(agent_id).await? else {
            return Ok(());
        };
        let account = self.accounts.get(account_id).await?;

        let account = match account {
            Some(account) if account.id == agent.account_id => account,
            _ => {
                info!(%agent_id, %account_id, "agent and account are not linked");
                return Err(ServiceError::Inconsistency(format!(
                    "agent {} does not belong to account {}",
                    agent_id, account_id
                )));
            }
        };

        if !self.agents.delete(agent_id).await? {
            return Ok(());
        }
        info!(%agent_id, %account_id, "agent deleted");

        notify(
            self.producer.as_ref(),
            Notification::agent_deleted(&agent, account.region),
        )
        .await;
        Ok(())
    }

    /// Block an agent and announce it on `block.agent.<region>`.
    ///
    /// Returns false when the agent does not exist. Blocking an already
    /// blocked agent succeeds and notifies again.
    pub async fn block(&self, id: Uuid) -> ServiceResult<bool> {
        self.set_blocked(id, true).await
    }

    /// Unblock an agent and announce it on `unblock.agent.<region>`.
    pub async fn unblock(&self, id: Uuid) -> ServiceResult<bool> {
        self.set_blocked(id, false).await
    }

    async fn set_blocked(&self, id: Uuid, blocked: bool) -> ServiceResult<bool> {
        let action = if blocked { "block" } else { "unblock" };
        info!(agent_id = %id, action, "updating agent");

        let Some(agent) = self.agents.get(id).await? else {
            return Ok(false);
        };
        let region = self.region_of(&agent).await?;

        let Some(agent) = self.agents.update(id, &AgentPatch::blocked(blocked)).await? else {
            // Gone from the primary store while the cache still had it.
            return Ok(false);
        };

        let notification = if blocked {
            Notification::agent_blocked(&agent, region)
        } else {
            Notification::agent_unblocked(&agent, region)
        };
        notify(self.producer.as_ref(), notification).await;
        Ok(true)
    }

    async fn region_of(&self, agent: &Agent) -> ServiceResult<Region> {
        match self.accounts.get(agent.account_id).await? {
            Some(account) => Ok(account.region),
            None => Err(ServiceError::Inconsistency(format!(
                "agent {} belongs to missing account {}",
                agent.id, agent.account_id
            ))),
        }
    }
}
