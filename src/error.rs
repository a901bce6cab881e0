use thiserror::Error;
use uuid::Uuid;

use crate::model::EntityKind;
use crate::repository::RepositoryError;

/// Errors returned by the account and agent services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("email already registered: {0}")]
    DuplicateEmail(String),

    /// The request contradicts the current state of the directory.
    #[error("inconsistent request: {0}")]
    Inconsistency(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Duplicate { email, .. } => ServiceError::DuplicateEmail(email),
            other => ServiceError::Repository(other),
        }
    }
}

impl ServiceError {
    pub fn not_found(kind: EntityKind, id: Uuid) -> Self {
        ServiceError::NotFound { kind, id }
    }

    /// Map this error to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::NotFound { .. } => 404,
            ServiceError::DuplicateEmail(_) => 409,
            ServiceError::Inconsistency(_) => 400,
            ServiceError::Repository(err) if err.is_retryable() => 503,
            ServiceError::Repository(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Repository(err) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
