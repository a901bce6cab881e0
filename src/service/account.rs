use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::notify;
use crate::bus::{EventProducer, Notification};
use crate::error::{ServiceError, ServiceResult};
use crate::model::{
    Account, AccountCriteria, AccountWithAgents, Agent, AgentCriteria, EntityKind, NewAccount,
};
use crate::repository::Repository;

/// Account reads and lifecycle.
///
/// Point reads go through whatever repository is injected, normally a
/// [`CachedRepository`](crate::cache::CachedRepository); lookups by
/// criteria always reach the primary store.
pub struct AccountService {
    accounts: Arc<dyn Repository<Account>>,
    agents: Arc<dyn Repository<Agent>>,
    producer: Arc<dyn EventProducer>,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn Repository<Account>>,
        agents: Arc<dyn Repository<Agent>>,
        producer: Arc<dyn EventProducer>,
    ) -> Self {
        Self {
            accounts,
            agents,
            producer,
        }
    }

    pub async fn get_all(&self) -> ServiceResult<Vec<Account>> {
        Ok(self.accounts.get_all().await?)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Account> {
        self.accounts
            .get(id)
            .await?
            .ok_or(ServiceError::not_found(EntityKind::Account, id))
    }

    /// The account and the agents it currently owns.
    pub async fn get_with_agents(&self, id: Uuid) -> ServiceResult<AccountWithAgents> {
        let account = self.get(id).await?;
        let agents = self.agents.get_by(&AgentCriteria::Account(id)).await?;
        Ok(AccountWithAgents { account, agents })
    }

    pub async fn get_by_email(&self, email: &str) -> ServiceResult<Option<Account>> {
        let mut found = self
            .accounts
            .get_by(&AccountCriteria::Email(email.to_string()))
            .await?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    /// Create an account and announce it on `create.account.<region>.<tier>`.
    pub async fn create(&self, input: NewAccount) -> ServiceResult<Account> {
        if self.get_by_email(&input.email).await?.is_some() {
            return Err(ServiceError::DuplicateEmail(input.email));
        }

        let account = self.accounts.create(Account::create(input)).await?;
        info!(account_id = %account.id, region = %account.region, vip = account.vip, "account created");

        notify(self.producer.as_ref(), Notification::account_created(&account)).await;
        Ok(account)
    }

    /// Delete an account together with its agents.
    ///
    /// Publishes the account deletion followed by one agent deletion per
    /// removed agent, all under the account's region. Deleting an unknown
    /// account is an inconsistency.
    pub async fn delete(&self, id: Uuid) -> ServiceResult<()> {
        let account = match self.accounts.get(id).await? {
            Some(account) => account,
            None => {
                return Err(ServiceError::Inconsistency(format!(
                    "account {} does not exist",
                    id
                )))
            }
        };
        let agents = self.agents.get_by(&AgentCriteria::Account(id)).await?;

        for agent in &agents {
            self.agents.delete(agent.id).await?;
        }
        if !self.accounts.delete(id).await? {
            // Removed concurrently; the cache still had it.
            return Err(ServiceError::Inconsistency(format!(
                "account {} does not exist",
                id
            )));
        }
        info!(account_id = %id, agents = agents.len(), "account deleted");

        notify(self.producer.as_ref(), Notification::account_deleted(&account)).await;
        for agent in &agents {
            notify(
                self.producer.as_ref(),
                Notification::agent_deleted(agent, account.region),
            )
            .await;
        }
        Ok(())
    }

    /// Erase the whole directory and tell every consumer to do the same.
    ///
    /// Returns how many accounts were removed.
    pub async fn delete_all(&self) -> ServiceResult<usize> {
        let agents = self.agents.delete_all().await?;
        let accounts = self.accounts.delete_all().await?;
        info!(accounts, agents, "directory cleared");

        notify(self.producer.as_ref(), Notification::directory_cleared()).await;
        Ok(accounts)
    }
}
