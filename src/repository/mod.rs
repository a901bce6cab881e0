//! Primary store boundary.
//!
//! The directory only sees the authoritative store through [`Repository`].
//! A SQL-backed implementation translates `Criteria` into queries; the
//! bundled [`InMemoryRepository`] evaluates them with [`Entity::matches`].
//!
//! ```ignore
//! let accounts: Arc<dyn Repository<Account>> = Arc::new(InMemoryRepository::new());
//! let created = accounts.create(Account::create(input)).await?;
//! let same = accounts.get(created.id).await?;
//! let vips = accounts.get_by(&AccountCriteria::Vip(true)).await?;
//! ```

mod error;
mod in_memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::model::EntityKind;

pub use error::RepositoryError;
pub use in_memory::InMemoryRepository;

/// A directory entity that can be stored, cached and filtered.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Which kind of entity this is. Drives the cache namespace.
    const KIND: EntityKind;

    /// Typed partial update (a struct of optional fields).
    type Patch: Send + Sync;

    /// Filters accepted by `get_by`.
    type Criteria: Send + Sync;

    fn id(&self) -> Uuid;

    /// Unique across every entity of this kind, compared ignoring ASCII case.
    fn unique_email(&self) -> &str;

    fn apply(&mut self, patch: &Self::Patch);

    fn matches(&self, criteria: &Self::Criteria) -> bool;
}

/// Read/write access to the authoritative store for one entity kind.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// Get an entity by id. `None` when absent.
    async fn get(&self, id: Uuid) -> Result<Option<E>, RepositoryError>;

    /// All entities matching the criteria.
    async fn get_by(&self, criteria: &E::Criteria) -> Result<Vec<E>, RepositoryError>;

    async fn get_all(&self) -> Result<Vec<E>, RepositoryError>;

    /// Insert a new entity. Fails if the id is already taken.
    async fn create(&self, entity: E) -> Result<E, RepositoryError>;

    /// Apply a patch. Returns the updated entity, or `None` when absent.
    async fn update(&self, id: Uuid, patch: &E::Patch) -> Result<Option<E>, RepositoryError>;

    /// Delete by id. Returns whether the entity existed.
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Delete everything. Returns how many entities were removed.
    async fn delete_all(&self) -> Result<usize, RepositoryError>;
}
