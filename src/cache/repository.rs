//! CachedRepository - cache-aside decorator over a primary repository.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::store::CacheStore;
use crate::repository::{Entity, Repository, RepositoryError};

/// Cache-aside decorator.
///
/// Only point reads (`get`) consult and populate the cache. Every other call,
/// including writes, goes straight to the inner repository and leaves the
/// cache alone, so an entity read before a delete keeps being served from the
/// cache until its TTL lapses.
///
/// Cache backend errors abort the read; they are never treated as a miss.
pub struct CachedRepository<E: Entity> {
    inner: Arc<dyn Repository<E>>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl<E: Entity> CachedRepository<E> {
    pub fn new(inner: Arc<dyn Repository<E>>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    async fn from_cache(&self, id: Uuid) -> Result<Option<E>, RepositoryError> {
        let namespace = E::KIND.cache_namespace();
        match self.cache.get(namespace, &id.to_string()).await? {
            Some(bytes) => {
                debug!(kind = %E::KIND, %id, "cache hit");
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => {
                debug!(kind = %E::KIND, %id, "cache miss");
                Ok(None)
            }
        }
    }

    async fn populate(&self, entity: &E) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec(entity)?;
        self.cache
            .set(
                E::KIND.cache_namespace(),
                &entity.id().to_string(),
                bytes,
                Some(self.ttl),
            )
            .await?;
        debug!(kind = %E::KIND, id = %entity.id(), ttl_secs = self.ttl.as_secs(), "cached snapshot");
        Ok(())
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for CachedRepository<E> {
    async fn get(&self, id: Uuid) -> Result<Option<E>, RepositoryError> {
        if let Some(cached) = self.from_cache(id).await? {
            return Ok(Some(cached));
        }

        let found = self.inner.get(id).await?;
        if let Some(entity) = &found {
            self.populate(entity).await?;
        }
        Ok(found)
    }

    async fn get_by(&self, criteria: &E::Criteria) -> Result<Vec<E>, RepositoryError> {
        self.inner.get_by(criteria).await
    }

    async fn get_all(&self) -> Result<Vec<E>, RepositoryError> {
        self.inner.get_all().await
    }

    async fn create(&self, entity: E) -> Result<E, RepositoryError> {
        self.inner.create(entity).await
    }

    async fn update(&self, id: Uuid, patch: &E::Patch) -> Result<Option<E>, RepositoryError> {
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete(id).await
    }

    async fn delete_all(&self) -> Result<usize, RepositoryError> {
        self.inner.delete_all().await
    }
}
