use std::time::Duration;

use agent_directory::{EntityKind, Region, Repository, ServiceError};

use crate::support::{Harness, TTL};

#[tokio::test(start_paused = true)]
async fn deleted_account_is_served_stale_until_ttl() {
    let h = Harness::start().await;
    let account = h.account(Region::Emea, true).await;
    let accounts = h.directory.accounts();

    // First read populates the cache.
    assert_eq!(accounts.get(account.id).await.unwrap(), account);
    assert!(h.cache.contains("Account", &account.id.to_string()));

    accounts.delete(account.id).await.unwrap();
    assert!(h.accounts.is_empty());

    // Within the TTL the cached snapshot still answers.
    tokio::time::advance(TTL - Duration::from_secs(1)).await;
    assert_eq!(accounts.get(account.id).await.unwrap(), account);

    tokio::time::advance(Duration::from_secs(2)).await;
    let err = accounts.get(account.id).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::NotFound {
            kind: EntityKind::Account,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn agent_outlives_its_deleted_account_until_ttl() {
    let h = Harness::start().await;
    let account = h.account(Region::Nam, true).await;
    let agent = h.agent(&account).await;
    let agents = h.directory.agents();

    assert_eq!(agents.get(agent.id).await.unwrap(), agent);

    // Deleting the account removes its agents from the primary store only.
    h.directory.accounts().delete(account.id).await.unwrap();
    assert!(h.agents.is_empty());
    assert!(h.cache.contains("Agent", &agent.id.to_string()));

    tokio::time::advance(TTL - Duration::from_secs(1)).await;
    assert_eq!(agents.get(agent.id).await.unwrap(), agent);

    tokio::time::advance(Duration::from_secs(2)).await;
    let err = agents.get(agent.id).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::NotFound {
            kind: EntityKind::Agent,
            ..
        }
    ));
}

#[tokio::test]
async fn fresh_ids_always_reflect_the_primary_store() {
    let h = Harness::start().await;
    let account = h.account(Region::Nam, false).await;

    // Writes never touch the cache.
    assert!(h.cache.is_empty());

    let agent = h.agent(&account).await;
    assert!(!h.cache.contains("Agent", &agent.id.to_string()));
    assert_eq!(h.directory.agents().get(agent.id).await.unwrap(), agent);
    assert!(h.cache.contains("Agent", &agent.id.to_string()));

    // A replacement account gets a new id, so nothing stale can answer for it.
    h.directory.accounts().delete(account.id).await.unwrap();
    let replacement = h.account(Region::Nam, false).await;
    assert_ne!(replacement.id, account.id);
    assert_eq!(
        h.directory.accounts().get(replacement.id).await.unwrap(),
        replacement
    );
}

#[tokio::test]
async fn cached_snapshot_lags_behind_updates() {
    let h = Harness::start().await;
    let account = h.account(Region::Apac, false).await;
    let agent = h.agent(&account).await;
    let agents = h.directory.agents();

    assert!(!agents.get(agent.id).await.unwrap().blocked);
    agents.block(agent.id).await.unwrap();

    // Primary store is updated, the cache is not invalidated.
    assert!(h.agents.get(agent.id).await.unwrap().unwrap().blocked);
    assert!(!agents.get(agent.id).await.unwrap().blocked);
}

#[tokio::test]
async fn cache_outage_fails_reads_instead_of_missing() {
    let h = Harness::start().await;
    let account = h.account(Region::Emea, false).await;

    h.cache.set_unavailable(true);
    let err = h.directory.accounts().get(account.id).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.status_code(), 503);

    h.cache.set_unavailable(false);
    assert_eq!(h.directory.accounts().get(account.id).await.unwrap(), account);
}

#[tokio::test]
async fn duplicate_email_is_checked_against_the_primary_store() {
    let h = Harness::start().await;
    let account = h.account(Region::Emea, false).await;

    let err = h
        .directory
        .accounts()
        .create(agent_directory::NewAccount {
            name: "Copy".into(),
            email: account.email.clone(),
            region: Region::Nam,
            vip: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::DuplicateEmail(_)));
    assert_eq!(h.accounts.len(), 1);
}
