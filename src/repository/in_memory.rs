//! InMemoryRepository - HashMap-backed primary store for testing and development.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Entity, Repository, RepositoryError};

/// Internal stored representation of an entity.
struct StoredEntity {
    bytes: Vec<u8>,
    seq: u64,
    /// Lowercased unique email, checked on every write.
    email: String,
}

fn email_key<E: Entity>(entity: &E) -> String {
    entity.unique_email().to_ascii_lowercase()
}

/// Fails when `email` belongs to an entity other than `id`.
fn ensure_email_free<E: Entity>(
    storage: &HashMap<Uuid, StoredEntity>,
    id: Uuid,
    email: &str,
) -> Result<(), RepositoryError> {
    let taken = storage
        .iter()
        .any(|(other, stored)| *other != id && stored.email == email);
    if taken {
        return Err(RepositoryError::Duplicate {
            kind: E::KIND,
            email: email.to_string(),
        });
    }
    Ok(())
}

/// In-memory primary store for one entity kind.
///
/// Entities are kept as serialized JSON so every read hands out an
/// independent snapshot, the same way a database round trip would.
/// Clone-friendly via Arc.
pub struct InMemoryRepository<E> {
    storage: Arc<RwLock<HashMap<Uuid, StoredEntity>>>,
    seq: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for InMemoryRepository<E> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            seq: Arc::clone(&self.seq),
            offline: Arc::clone(&self.offline),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> InMemoryRepository<E> {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            seq: Arc::new(AtomicU64::new(1)),
            offline: Arc::new(AtomicBool::new(false)),
            _entity: PhantomData,
        }
    }

    /// Simulate an outage: every call fails with a backend error until
    /// switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.storage.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_online(&self) -> Result<(), RepositoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepositoryError::Backend("store offline".into()));
        }
        Ok(())
    }

    fn decode(stored: &StoredEntity) -> Result<E, RepositoryError> {
        Ok(serde_json::from_slice(&stored.bytes)?)
    }

    fn scan<F>(&self, keep: F) -> Result<Vec<E>, RepositoryError>
    where
        F: Fn(&E) -> bool,
    {
        self.ensure_online()?;
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::LockPoisoned("read"))?;

        let mut rows = Vec::new();
        for stored in storage.values() {
            let entity = Self::decode(stored)?;
            if keep(&entity) {
                rows.push((stored.seq, entity));
            }
        }
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, entity)| entity).collect())
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    async fn get(&self, id: Uuid) -> Result<Option<E>, RepositoryError> {
        self.ensure_online()?;
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::LockPoisoned("read"))?;

        storage.get(&id).map(Self::decode).transpose()
    }

    async fn get_by(&self, criteria: &E::Criteria) -> Result<Vec<E>, RepositoryError> {
        self.scan(|entity| entity.matches(criteria))
    }

    async fn get_all(&self) -> Result<Vec<E>, RepositoryError> {
        self.scan(|_| true)
    }

    async fn create(&self, entity: E) -> Result<E, RepositoryError> {
        self.ensure_online()?;
        let bytes = serde_json::to_vec(&entity)?;
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("write"))?;

        if storage.contains_key(&entity.id()) {
            return Err(RepositoryError::AlreadyExists {
                kind: E::KIND,
                id: entity.id(),
            });
        }
        let email = email_key(&entity);
        ensure_email_free::<E>(&storage, entity.id(), &email)?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        storage.insert(entity.id(), StoredEntity { bytes, seq, email });
        Ok(entity)
    }

    async fn update(&self, id: Uuid, patch: &E::Patch) -> Result<Option<E>, RepositoryError> {
        self.ensure_online()?;
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("write"))?;

        let Some(stored) = storage.get(&id) else {
            return Ok(None);
        };

        let mut entity = Self::decode(stored)?;
        entity.apply(patch);
        let email = email_key(&entity);
        ensure_email_free::<E>(&storage, id, &email)?;
        let bytes = serde_json::to_vec(&entity)?;

        if let Some(stored) = storage.get_mut(&id) {
            stored.bytes = bytes;
            stored.email = email;
        }
        Ok(Some(entity))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.ensure_online()?;
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("write"))?;
        Ok(storage.remove(&id).is_some())
    }

    async fn delete_all(&self) -> Result<usize, RepositoryError> {
        self.ensure_online()?;
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("write"))?;
        let removed = storage.len();
        storage.clear();
        Ok(removed)
    }
}
