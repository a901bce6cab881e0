use thiserror::Error;
use uuid::Uuid;

use crate::cache::CacheError;
use crate::model::EntityKind;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: EntityKind, id: Uuid },

    #[error("{kind} email {email} is already taken")]
    Duplicate { kind: EntityKind, email: String },

    #[error("snapshot serialization error: {0}")]
    Serde(String),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Cache(err) => err.is_retryable(),
            RepositoryError::Backend(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serde(err.to_string())
    }
}
